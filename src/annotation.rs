//! Declarative service metadata.
//!
//! An [`Annotation`] is one declaration attached to a service type or to one of
//! its methods. Annotations are usually written through the builder pair
//! [`ServiceDescriptor`] / [`MethodDescriptor`] and handed to
//! [`ServiceContainer::register`](crate::ServiceContainer::register):
//!
//! ```
//! use std::sync::Arc;
//! use tsu_services::{MethodDescriptor, Request, ServiceDescriptor, ServiceError, ServiceType};
//!
//! #[derive(Default)]
//! struct People;
//!
//! async fn get(_svc: Arc<People>, req: Request) -> Result<String, ServiceError> {
//!     Ok(format!("person {}", req.param("id").unwrap_or_default()))
//! }
//!
//! let people = ServiceDescriptor::new(ServiceType::of::<People>())
//!     .path("people")
//!     .accept(["application/json"])
//!     .method(MethodDescriptor::get("get").path(":id").handler(get));
//! # let _ = people;
//! ```
//!
//! Annotations apply in the order written. List-valued declarations follow
//! their own rules: processors are inserted at the front (the last one written
//! runs first), `Accept`/`AcceptLanguage` merge into the existing set.

use indexmap::IndexSet;
use serde_json::Value;

use crate::error::{BuildError, BuildResult};
use crate::handler::{BoxedHandler, Handler};
use crate::metadata::{
    BodyOptions, ClassMetadata, FileDescriptor, MethodMetadata, ParamDescriptor, ParamKind, PostProcessor,
    PreProcessor, ServiceType,
};
use crate::method::Method;

/// One declaration on a service type or method.
#[derive(Clone, Debug)]
pub enum Annotation {
    /// Path fragment. Replaces any earlier one.
    Path(String),
    /// Required roles; an empty list means any authenticated caller (`*`).
    Security(Vec<String>),
    PreProcessor(PreProcessor),
    PostProcessor(PostProcessor),
    AcceptLanguage(Vec<String>),
    Accept(Vec<String>),
    BodyOptions(BodyOptions),
    /// Once the route answers, later router layers for the path are skipped.
    IgnoreNextMiddlewares,
    /// Type only: the type is a base for others and gets no routes itself.
    Abstract,
    /// Method only.
    Verb(Method),
    /// Method only.
    Param(ParamDescriptor),
    /// Method only: the method takes a value that may come from the query or a form.
    AcceptMultiTypedParam,
    /// Free-form extension data.
    Property(String, Value),
}

impl Annotation {
    /// The name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Path(_)               => "Path",
            Self::Security(_)           => "Security",
            Self::PreProcessor(_)       => "PreProcessor",
            Self::PostProcessor(_)      => "PostProcessor",
            Self::AcceptLanguage(_)     => "AcceptLanguage",
            Self::Accept(_)             => "Accept",
            Self::BodyOptions(_)        => "BodyOptions",
            Self::IgnoreNextMiddlewares => "IgnoreNextMiddlewares",
            Self::Abstract              => "Abstract",
            Self::Verb(_)               => "Verb",
            Self::Param(_)              => "Param",
            Self::AcceptMultiTypedParam => "AcceptMultiTypedParam",
            Self::Property(..)          => "Property",
        }
    }

    pub(crate) fn apply_to_class(self, class: &mut ClassMetadata) -> BuildResult<()> {
        let name = self.name();
        match self {
            Self::Path(path)                => class.path = Some(path),
            Self::Security(roles)           => class.roles = role_set(roles),
            Self::PreProcessor(p)           => class.pre_processors.insert(0, p),
            Self::PostProcessor(p)          => class.post_processors.insert(0, p),
            Self::AcceptLanguage(values)    => merge_values(name, &mut class.languages, values)?,
            Self::Accept(values)            => merge_values(name, &mut class.accepts, values)?,
            Self::BodyOptions(options)      => class.body_options = Some(options),
            Self::IgnoreNextMiddlewares     => class.ignore_next_middlewares = true,
            Self::Abstract                  => class.is_abstract = true,
            Self::Property(key, value)      => {
                class.properties.insert(key, value);
            }
            Self::Verb(_) | Self::Param(_) | Self::AcceptMultiTypedParam => {
                return Err(BuildError::invalid(name, "only methods accept it"));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_to_method(self, method: &mut MethodMetadata) -> BuildResult<()> {
        let name = self.name();
        match self {
            Self::Path(path)                => method.path = Some(path),
            Self::Security(roles)           => method.roles = role_set(roles),
            Self::PreProcessor(p)           => {
                method.must_parse_cookies |= p.needs_cookies();
                method.pre_processors.insert(0, p);
            }
            Self::PostProcessor(p)          => {
                method.must_parse_cookies |= p.needs_cookies();
                method.post_processors.insert(0, p);
            }
            Self::AcceptLanguage(values)    => merge_values(name, &mut method.languages, values)?,
            Self::Accept(values)            => merge_values(name, &mut method.accepts, values)?,
            Self::BodyOptions(options)      => method.body_options = Some(options),
            Self::IgnoreNextMiddlewares     => method.ignore_next_middlewares = true,
            Self::Verb(verb)                => method.http_method = Some(verb),
            Self::Param(param)              => add_param(method, param)?,
            Self::AcceptMultiTypedParam     => method.accept_multi_typed_param = true,
            Self::Property(..)              => {
                return Err(BuildError::invalid(name, "only service types accept it"));
            }
            Self::Abstract => {
                return Err(BuildError::invalid(name, "only service types can be abstract"));
            }
        }
        Ok(())
    }
}

fn role_set(roles: Vec<String>) -> IndexSet<String> {
    let roles: IndexSet<String> = roles.into_iter().filter(|r| !r.is_empty()).collect();
    if roles.is_empty() { IndexSet::from(["*".to_owned()]) } else { roles }
}

fn merge_values(name: &'static str, set: &mut IndexSet<String>, values: Vec<String>) -> BuildResult<()> {
    let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return Err(BuildError::invalid(name, "at least one value is required"));
    }
    set.extend(values);
    Ok(())
}

fn add_param(method: &mut MethodMetadata, param: ParamDescriptor) -> BuildResult<()> {
    match param.kind {
        ParamKind::Body if method.must_parse_forms => {
            return Err(BuildError::invalid("Param", "a body parameter cannot be used with form parameters"));
        }
        ParamKind::Body if method.must_parse_body => {
            return Err(BuildError::invalid("Param", "only one body parameter is allowed"));
        }
        ParamKind::Form if method.must_parse_body => {
            return Err(BuildError::invalid("Param", "form parameters cannot be used with a body parameter"));
        }
        ParamKind::Body    => method.must_parse_body = true,
        ParamKind::Form    => method.must_parse_forms = true,
        ParamKind::RawBody => method.must_parse_raw_body = true,
        ParamKind::Cookie  => method.must_parse_cookies = true,
        ParamKind::File    => method.files.push(FileDescriptor { name: param.name.clone(), single: true }),
        ParamKind::Files   => method.files.push(FileDescriptor { name: param.name.clone(), single: false }),
        _ => {}
    }
    method.parameters.push(param);
    Ok(())
}

fn strings<I, T>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

// ── MethodDescriptor ──────────────────────────────────────────────────────────

/// The declarations on one service method.
pub struct MethodDescriptor {
    pub(crate) name: String,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) handler: Option<BoxedHandler>,
    pub(crate) error: Option<BuildError>,
}

macro_rules! verb_constructors {
    ($($fn_name:ident => $verb:ident),* $(,)?) => {
        $(
            #[doc = concat!("A method bound to `", stringify!($verb), "`.")]
            pub fn $fn_name(name: impl Into<String>) -> Self {
                Self::new(name).annotate(Annotation::Verb(Method::$verb))
            }
        )*
    };
}

impl MethodDescriptor {
    /// A method with no verb yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), annotations: Vec::new(), handler: None, error: None }
    }

    verb_constructors! {
        get     => Get,
        post    => Post,
        put     => Put,
        delete  => Delete,
        head    => Head,
        options => Options,
        patch   => Patch,
    }

    pub fn name(&self) -> &str { &self.name }

    /// Adds any annotation.
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Sets the verb from its wire name. An unknown verb fails registration.
    pub fn verb(mut self, verb: &str) -> Self {
        match verb.parse::<Method>() {
            Ok(method) => self.annotate(Annotation::Verb(method)),
            Err(_) => {
                if self.error.is_none() {
                    self.error = Some(BuildError::UnsupportedMethod {
                        path: self.name.clone(),
                        method: verb.to_owned(),
                    });
                }
                self
            }
        }
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.annotate(Annotation::Path(path.into()))
    }

    pub fn security<I, T>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::Security(strings(roles)))
    }

    pub fn pre_processor(self, processor: PreProcessor) -> Self {
        self.annotate(Annotation::PreProcessor(processor))
    }

    pub fn post_processor(self, processor: PostProcessor) -> Self {
        self.annotate(Annotation::PostProcessor(processor))
    }

    pub fn accept_language<I, T>(self, languages: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::AcceptLanguage(strings(languages)))
    }

    pub fn accept<I, T>(self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::Accept(strings(types)))
    }

    pub fn body_options(self, options: BodyOptions) -> Self {
        self.annotate(Annotation::BodyOptions(options))
    }

    pub fn ignore_next_middlewares(self) -> Self {
        self.annotate(Annotation::IgnoreNextMiddlewares)
    }

    pub fn param(self, kind: ParamKind, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.annotate(Annotation::Param(ParamDescriptor::new(kind, name, type_name)))
    }

    /// A single uploaded file in multipart field `name`.
    pub fn file(self, name: impl Into<String>) -> Self {
        self.param(ParamKind::File, name, "file")
    }

    /// Any number of uploaded files in multipart field `name`.
    pub fn files(self, name: impl Into<String>) -> Self {
        self.param(ParamKind::Files, name, "file[]")
    }

    pub fn accept_multi_typed_param(self) -> Self {
        self.annotate(Annotation::AcceptMultiTypedParam)
    }

    /// The async function implementing the method.
    pub fn handler<S, H: Handler<S>>(mut self, handler: H) -> Self {
        self.handler = Some(handler.into_boxed_handler());
        self
    }
}

// ── ServiceDescriptor ─────────────────────────────────────────────────────────

/// The declarations on one service type and its methods.
pub struct ServiceDescriptor {
    pub(crate) target: ServiceType,
    pub(crate) parent: Option<ServiceType>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(target: ServiceType) -> Self {
        Self { target, parent: None, annotations: Vec::new(), methods: Vec::new() }
    }

    pub fn target(&self) -> ServiceType { self.target }

    /// Inherits the parent's methods and properties. The parent must be registered
    /// first.
    pub fn extends(mut self, parent: ServiceType) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn path(self, path: impl Into<String>) -> Self {
        self.annotate(Annotation::Path(path.into()))
    }

    pub fn security<I, T>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::Security(strings(roles)))
    }

    pub fn pre_processor(self, processor: PreProcessor) -> Self {
        self.annotate(Annotation::PreProcessor(processor))
    }

    pub fn post_processor(self, processor: PostProcessor) -> Self {
        self.annotate(Annotation::PostProcessor(processor))
    }

    pub fn accept_language<I, T>(self, languages: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::AcceptLanguage(strings(languages)))
    }

    pub fn accept<I, T>(self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.annotate(Annotation::Accept(strings(types)))
    }

    pub fn body_options(self, options: BodyOptions) -> Self {
        self.annotate(Annotation::BodyOptions(options))
    }

    pub fn ignore_next_middlewares(self) -> Self {
        self.annotate(Annotation::IgnoreNextMiddlewares)
    }

    /// Marks the type as a base: registered, inheritable, never routed.
    pub fn mark_abstract(self) -> Self {
        self.annotate(Annotation::Abstract)
    }

    pub fn property(self, key: impl Into<String>, value: Value) -> Self {
        self.annotate(Annotation::Property(key.into(), value))
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }
}
