//! Per-route pipeline assembly.
//!
//! For one service method, [`PipelineBuilder::build`] lays out the stages in a
//! fixed order, each present only when the declarations call for it:
//!
//! | # | Stage | Present when |
//! |---|---|---|
//! | 1 | authenticator | an authenticator is set and any role is declared |
//! | 2 | role check | a role other than `*` is declared |
//! | 3 | cookies | a cookie param or a cookie-reading processor is declared |
//! | 4 | raw body | a raw-body param is declared |
//! | 5 | JSON body | a body param is declared |
//! | 6 | url-encoded form | a form param is declared, or the method takes multi-typed params |
//! | 7 | files | a file param is declared |
//! | 8 | pre-processors | any is declared |
//! | 9 | service | always |
//! | 10 | post-processors | any is declared |

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::metadata::{ClassMetadata, MethodMetadata, PostProcessor, PreProcessor};
use crate::middleware::parsers::{
    CookieDecoder, CookieParser, DEFAULT_BODY_LIMIT, FormParser, JsonBodyParser, RawBodyParser,
};
use crate::middleware::security::RoleCheck;
use crate::middleware::service::{PostProcessors, PreProcessors, ServiceStage};
use crate::middleware::upload::{FieldSpec, FileFilter, FileLimits, Uploader};
use crate::middleware::{BoxedMiddleware, Pipeline};
use crate::service::{Authenticator, DefaultServiceFactory, HandlerInvoker, ServiceFactory, ServiceInvoker};

/// Holds the collaborators and settings every route pipeline is built from.
pub struct PipelineBuilder {
    pub(crate) factory: Arc<dyn ServiceFactory>,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) invoker: Arc<dyn ServiceInvoker>,
    pub(crate) cookie_decoder: Option<CookieDecoder>,
    pub(crate) file_dest: Option<PathBuf>,
    pub(crate) file_filter: Option<FileFilter>,
    pub(crate) file_limits: FileLimits,
    pub(crate) body_limit: usize,
    pub(crate) ignore_next_middlewares: bool,
    uploader: OnceLock<Arc<Uploader>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(DefaultServiceFactory),
            authenticator: None,
            invoker: Arc::new(HandlerInvoker),
            cookie_decoder: None,
            file_dest: None,
            file_filter: None,
            file_limits: FileLimits::default(),
            body_limit: DEFAULT_BODY_LIMIT,
            ignore_next_middlewares: false,
            uploader: OnceLock::new(),
        }
    }

    /// The pipeline for `method` of `class`. Paths must already be resolved.
    pub fn build(&self, class: &ClassMetadata, method: &MethodMetadata) -> Pipeline {
        let mut stages: Vec<BoxedMiddleware> = Vec::new();
        self.security_stages(class, method, &mut stages);
        self.parser_stages(class, method, &mut stages);

        let pre = merged(method.pre_processors(), class.pre_processors(), PreProcessor::same);
        if !pre.is_empty() {
            stages.push(Arc::new(PreProcessors::new(pre)));
        }
        stages.push(Arc::new(ServiceStage::new(
            method.owner().unwrap_or(class.target()),
            Arc::new(method.clone()),
            Arc::clone(&self.invoker),
            Arc::clone(&self.factory),
        )));
        let post = merged(method.post_processors(), class.post_processors(), PostProcessor::same);
        if !post.is_empty() {
            stages.push(Arc::new(PostProcessors::new(post)));
        }

        let ignore_next = method.ignores_next_middlewares()
            || class.ignores_next_middlewares()
            || self.ignore_next_middlewares;
        Pipeline::new(stages).ignore_next_middlewares(ignore_next)
    }

    fn security_stages(&self, class: &ClassMetadata, method: &MethodMetadata, stages: &mut Vec<BoxedMiddleware>) {
        let roles: IndexSet<String> = method.roles().union(class.roles()).filter(|r| !r.is_empty()).cloned().collect();
        if roles.is_empty() {
            return;
        }
        let Some(authenticator) = &self.authenticator else {
            warn!(
                service = class.target().name(),
                method = method.name(),
                ?roles,
                "roles declared but no authenticator configured; route is unprotected",
            );
            return;
        };
        stages.push(authenticator.middleware());

        let required: IndexSet<String> = roles.into_iter().filter(|r| r != "*").collect();
        if !required.is_empty() {
            stages.push(Arc::new(RoleCheck::new(required, Arc::clone(authenticator))));
        }
    }

    fn parser_stages(&self, class: &ClassMetadata, method: &MethodMetadata, stages: &mut Vec<BoxedMiddleware>) {
        let options = method.body_options().or(class.body_options());
        let reads_cookies = method.must_parse_cookies
            || class.pre_processors().iter().any(PreProcessor::needs_cookies)
            || class.post_processors().iter().any(PostProcessor::needs_cookies);

        if reads_cookies {
            stages.push(Arc::new(CookieParser::new(self.cookie_decoder.clone())));
        }
        if method.must_parse_raw_body {
            stages.push(Arc::new(RawBodyParser::new(options, self.body_limit)));
        }
        if method.must_parse_body {
            stages.push(Arc::new(JsonBodyParser::new(options, self.body_limit)));
        }
        if method.must_parse_forms || method.accepts_multi_typed_param() {
            stages.push(Arc::new(FormParser::new(options, self.body_limit)));
        }
        if !method.files().is_empty() {
            let fields = method.files().iter().map(FieldSpec::from).collect();
            stages.push(Arc::new(self.uploader().fields(fields)));
        }
    }

    /// The shared uploader, built from the file settings on first use.
    pub fn uploader(&self) -> &Arc<Uploader> {
        self.uploader.get_or_init(|| {
            debug!(dest = ?self.file_dest, "uploader created");
            Arc::new(Uploader::new(self.file_dest.clone(), self.file_filter.clone(), self.file_limits.clone()))
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self { Self::new() }
}

/// Method entries first, then class entries not already present.
fn merged<P: Clone>(method: &[P], class: &[P], same: fn(&P, &P) -> bool) -> Vec<P> {
    let mut list = method.to_vec();
    for p in class {
        if !list.iter().any(|q| same(q, p)) {
            list.push(p.clone());
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{BodyOptions, FileDescriptor, ServiceType};
    use crate::middleware::testing::recording;
    use crate::middleware::Flow;
    use crate::request::Request;

    #[derive(Default)]
    struct People;

    struct AllowAll;

    impl Authenticator for AllowAll {
        fn middleware(&self) -> BoxedMiddleware {
            recording("authenticator", &Default::default(), || Ok(Flow::Next))
        }

        fn roles(&self, _request: &Request) -> Vec<String> {
            vec!["ADMIN".into()]
        }
    }

    fn class() -> ClassMetadata {
        ClassMetadata::new(ServiceType::of::<People>(), None)
    }

    fn method() -> MethodMetadata {
        MethodMetadata::new("list")
    }

    fn secured() -> PipelineBuilder {
        PipelineBuilder { authenticator: Some(Arc::new(AllowAll)), ..PipelineBuilder::new() }
    }

    #[test]
    fn minimal_route_is_just_the_service() {
        let pipeline = PipelineBuilder::new().build(&class(), &method());
        assert_eq!(pipeline.stage_names(), ["service"]);
    }

    #[test]
    fn every_stage_in_order() {
        let mut class = class();
        class.roles.insert("ADMIN".into());
        class.pre_processors.push(PreProcessor::new("class-pre", |_| Ok(())));

        let mut method = method();
        method.must_parse_cookies = true;
        method.must_parse_raw_body = true;
        method.must_parse_body = true;
        method.accept_multi_typed_param = true;
        method.files.push(FileDescriptor { name: "avatar".into(), single: true });
        method.post_processors.push(PostProcessor::new("post", |_, _| Ok(())));

        let pipeline = secured().build(&class, &method);
        assert_eq!(pipeline.stage_names(), [
            "authenticator",
            "role-check",
            "cookie-parser",
            "raw-body-parser",
            "json-parser",
            "form-parser",
            "files-parser",
            "pre-processors",
            "service",
            "post-processors",
        ]);
    }

    #[test]
    fn wildcard_role_skips_the_role_check() {
        let mut method = method();
        method.roles.insert("*".into());
        let pipeline = secured().build(&class(), &method);
        assert_eq!(pipeline.stage_names(), ["authenticator", "service"]);
    }

    #[test]
    fn roles_without_authenticator_are_not_enforced() {
        let mut method = method();
        method.roles.insert("ADMIN".into());
        let pipeline = PipelineBuilder::new().build(&class(), &method);
        assert_eq!(pipeline.stage_names(), ["service"]);
    }

    #[test]
    fn method_processors_run_before_class_processors() {
        let shared = PreProcessor::new("shared", |_| Ok(()));
        let mut class = class();
        class.pre_processors = vec![PreProcessor::new("class", |_| Ok(())), shared.clone()];
        let mut method = method();
        method.pre_processors = vec![PreProcessor::new("method", |_| Ok(())), shared];

        let list = merged(method.pre_processors(), class.pre_processors(), PreProcessor::same);
        let names: Vec<_> = list.iter().map(PreProcessor::name).collect();
        assert_eq!(names, ["method", "shared", "class"]);
    }

    #[test]
    fn ignore_next_comes_from_any_level() {
        let mut flagged = class();
        flagged.ignore_next_middlewares = true;
        assert!(PipelineBuilder::new().build(&flagged, &method()).ignores_next());

        let global = PipelineBuilder { ignore_next_middlewares: true, ..PipelineBuilder::new() };
        assert!(global.build(&class(), &method()).ignores_next());

        assert!(!PipelineBuilder::new().build(&class(), &method()).ignores_next());
    }

    #[test]
    fn uploader_is_shared_between_routes() {
        let builder = PipelineBuilder { file_limits: FileLimits { files: Some(3), ..FileLimits::default() }, ..PipelineBuilder::new() };
        let first = Arc::clone(builder.uploader());
        assert!(Arc::ptr_eq(&first, builder.uploader()));
        assert_eq!(first.limits().files, Some(3));
    }

    #[test]
    fn method_body_options_win() {
        let mut class = class();
        class.body_options = Some(BodyOptions { limit: Some(1), types: None });
        let mut method = method();
        method.must_parse_body = true;
        method.body_options = Some(BodyOptions { limit: Some(10), types: None });
        assert_eq!(method.body_options().or(class.body_options()).and_then(|o| o.limit), Some(10));
        assert_eq!(PipelineBuilder::new().build(&class, &method).stage_names(), ["json-parser", "service"]);
    }
}
