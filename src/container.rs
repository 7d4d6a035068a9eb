//! The service container: registration, resolution and binding.
//!
//! ```text
//!   register(descriptor) ─┐
//!   annotate_class(..)  ──┼─▶ Registry ──refresh──▶ resolved paths + PathIndex
//!   annotate_method(..) ──┘                               │
//!                                                         ▼
//!   build_services(router, types) ──▶ PipelineBuilder ──▶ router.on(verb, path, pipeline)
//!                                                    └──▶ router.all(path, NotAllowed)
//! ```
//!
//! Registration needs `&mut self`; everything after it only reads. Reads that
//! need resolved paths refresh them first, under the registry's write lock, and
//! then share a read lock with other readers.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::annotation::{Annotation, ServiceDescriptor};
use crate::config::ServiceConfig;
use crate::error::{BuildError, BuildResult};
use crate::metadata::{ClassMetadata, MethodMetadata, ServiceType};
use crate::method::Method;
use crate::middleware::not_allowed::NotAllowed;
use crate::middleware::parsers::CookieDecoder;
use crate::middleware::upload::{FileFilter, FileLimits};
use crate::pipeline::PipelineBuilder;
use crate::registry::{Registry, in_service};
use crate::router::RouteTarget;
use crate::service::{Authenticator, ServiceFactory, ServiceInvoker};

/// A group of services loaded together, such as one application module.
pub trait ServiceModule {
    /// Identifies the module in load errors.
    fn name(&self) -> &str;

    fn services(&self) -> Vec<ServiceDescriptor>;
}

/// Collects service metadata and binds it onto routers.
pub struct ServiceContainer {
    registry: RwLock<Registry>,
    pipelines: PipelineBuilder,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self { registry: RwLock::new(Registry::default()), pipelines: PipelineBuilder::new() }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        let mut container = Self::new();
        container.pipelines.ignore_next_middlewares = config.ignore_next_middlewares;
        container.pipelines.body_limit = config.body.limit;
        container.pipelines.file_dest = config.uploads.dest.clone();
        container.pipelines.file_limits = config.uploads.limits.clone();
        container
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// Replaces the factory. Types registered earlier were keyed with the old
    /// factory's [`ServiceFactory::target_class`].
    pub fn service_factory(mut self, factory: impl ServiceFactory) -> Self {
        self.pipelines.factory = Arc::new(factory);
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.pipelines.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn service_invoker(mut self, invoker: impl ServiceInvoker) -> Self {
        self.pipelines.invoker = Arc::new(invoker);
        self
    }

    pub fn cookie_decoder(mut self, decoder: CookieDecoder) -> Self {
        self.pipelines.cookie_decoder = Some(decoder);
        self
    }

    /// Upload settings are read once, when the first route with files is built.
    pub fn file_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.pipelines.file_dest = Some(dest.into());
        self
    }

    pub fn file_filter(mut self, filter: FileFilter) -> Self {
        self.pipelines.file_filter = Some(filter);
        self
    }

    pub fn file_limits(mut self, limits: FileLimits) -> Self {
        self.pipelines.file_limits = limits;
        self
    }

    pub fn ignore_next_middlewares(mut self, ignore: bool) -> Self {
        self.pipelines.ignore_next_middlewares = ignore;
        self
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Creates (or returns) the metadata of a service type.
    pub fn register_class(&mut self, target: ServiceType, parent: Option<ServiceType>) -> &mut ClassMetadata {
        let (target, parent) = self.canonical(target, parent);
        self.registry.get_mut().register_class(target, parent)
    }

    /// Creates (or returns) the metadata of one method; `None` for an empty name.
    pub fn register_method(&mut self, target: ServiceType, name: &str) -> Option<&mut MethodMetadata> {
        let (target, _) = self.canonical(target, None);
        self.registry.get_mut().register_method(target, None, name)
    }

    pub fn annotate_class(&mut self, target: ServiceType, annotation: Annotation) -> BuildResult<()> {
        annotation.apply_to_class(self.register_class(target, None)).map_err(|e| in_service(target, e))
    }

    /// A no-op for an empty method name.
    pub fn annotate_method(&mut self, target: ServiceType, name: &str, annotation: Annotation) -> BuildResult<()> {
        match self.register_method(target, name) {
            Some(method) => annotation.apply_to_method(method).map_err(|e| in_service(target, e)),
            None => Ok(()),
        }
    }

    /// Registers a service and all its methods.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> BuildResult<()> {
        let ServiceDescriptor { target, parent, annotations, mut methods } = descriptor;
        if let Some(error) = methods.iter_mut().find_map(|m| m.error.take()) {
            return Err(match error {
                BuildError::UnsupportedMethod { path, method } => {
                    BuildError::UnsupportedMethod { path: format!("{}::{path}", target.name()), method }
                }
                other => other,
            });
        }

        self.register_class(target, parent);
        for annotation in annotations {
            self.annotate_class(target, annotation)?;
        }
        for method in methods {
            for annotation in method.annotations {
                self.annotate_method(target, &method.name, annotation)?;
            }
            let Some(handler) = method.handler else { continue };
            let (owner, _) = self.canonical(handler.service(), None);
            if let Some(metadata) = self.register_method(target, &method.name) {
                metadata.handler = Some(handler);
                metadata.owner = Some(owner);
            }
        }
        Ok(())
    }

    fn canonical(&self, target: ServiceType, parent: Option<ServiceType>) -> (ServiceType, Option<ServiceType>) {
        let factory = &self.pipelines.factory;
        (factory.target_class(target), parent.map(|p| factory.target_class(p)))
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// A read guard over a registry whose paths are resolved.
    fn resolved(&self) -> BuildResult<RwLockReadGuard<'_, Registry>> {
        let registry = self.registry.read();
        if !registry.is_dirty() {
            return Ok(registry);
        }
        drop(registry);

        let registry = self.registry.upgradable_read();
        if !registry.is_dirty() {
            return Ok(RwLockUpgradableReadGuard::downgrade(registry));
        }
        let mut registry = RwLockUpgradableReadGuard::upgrade(registry);
        registry.refresh()?;
        Ok(RwLockWriteGuard::downgrade(registry))
    }

    /// A snapshot of one service's metadata, with paths resolved.
    pub fn service_class(&self, target: ServiceType) -> BuildResult<Option<ClassMetadata>> {
        let (target, _) = self.canonical(target, None);
        Ok(self.resolved()?.class(&target).cloned())
    }

    /// Every resolved route path, in declaration order.
    pub fn paths(&self) -> BuildResult<Vec<String>> {
        Ok(self.resolved()?.paths().paths().map(str::to_owned).collect())
    }

    /// Verbs declared on `path`, in declaration order; empty for unknown paths.
    pub fn http_methods(&self, path: &str) -> BuildResult<Vec<Method>> {
        Ok(self.resolved()?.paths().methods(path))
    }

    // ── Binding ───────────────────────────────────────────────────────────────

    /// Binds every registered, non-abstract service (only those in `types`, when
    /// given) onto `router`, then adds a `405` fallback to each bound path.
    ///
    /// Binding the same service twice on one router fails: the router refuses the
    /// second `(path, verb)` registration.
    pub fn build_services(&self, router: &mut dyn RouteTarget, types: Option<&[ServiceType]>) -> BuildResult<()> {
        let selected: Option<Vec<ServiceType>> = types.map(|types| {
            types.iter().map(|&t| self.pipelines.factory.target_class(t)).collect()
        });
        if let Some(authenticator) = &self.pipelines.authenticator {
            authenticator.initialize(router)?;
        }

        let registry = self.resolved()?;
        let mut bound: IndexMap<String, Vec<Method>> = IndexMap::new();
        for class in registry.classes() {
            if class.is_abstract() || selected.as_ref().is_some_and(|s| !s.contains(&class.target())) {
                continue;
            }
            for method in class.methods() {
                let path = method.resolved_path().unwrap_or_default();
                let verb = method.http_method().ok_or_else(|| BuildError::UnsupportedMethod {
                    path: path.to_owned(),
                    method: "(none)".into(),
                })?;
                let pipeline = self.pipelines.build(class, method);
                debug!(
                    service = class.target().name(),
                    method = method.name(),
                    %verb,
                    path,
                    stages = ?pipeline.stage_names(),
                    "binding route",
                );
                router.on(verb, path, pipeline)?;
                bound.entry(path.to_owned()).or_default().push(verb);
            }
        }

        let routes: usize = bound.values().map(Vec::len).sum();
        for (path, verbs) in &bound {
            router.all(path, Arc::new(NotAllowed::new(verbs.clone())))?;
        }
        info!(routes, paths = bound.len(), "services bound");
        Ok(())
    }

    /// Registers every module's services and binds exactly those.
    pub fn load_services(&mut self, router: &mut dyn RouteTarget, modules: &[&dyn ServiceModule]) -> BuildResult<()> {
        let patterns = modules.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ");
        self.load(router, modules)
            .map_err(|source| BuildError::LoadServices { patterns, source: Box::new(source) })
    }

    fn load(&mut self, router: &mut dyn RouteTarget, modules: &[&dyn ServiceModule]) -> BuildResult<()> {
        let mut types = Vec::new();
        for module in modules {
            for descriptor in module.services() {
                types.push(descriptor.target());
                self.register(descriptor)?;
            }
        }
        self.build_services(router, Some(types.as_slice()))
    }
}

impl Default for ServiceContainer {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::MethodDescriptor;
    use crate::router::Router;

    #[derive(Default)]
    struct People;
    #[derive(Default)]
    struct Orders;

    fn people() -> ServiceDescriptor {
        ServiceDescriptor::new(ServiceType::of::<People>())
            .path("people")
            .method(MethodDescriptor::get("list"))
            .method(MethodDescriptor::post("add"))
            .method(MethodDescriptor::get("get").path(":id"))
    }

    #[test]
    fn resolves_paths_and_verbs() {
        let mut container = ServiceContainer::new();
        container.register(people()).unwrap();
        assert_eq!(container.paths().unwrap(), ["/people", "/people/:id"]);
        assert_eq!(container.http_methods("/people").unwrap(), [Method::Get, Method::Post]);
        assert!(container.http_methods("/nowhere").unwrap().is_empty());
    }

    #[test]
    fn resolved_path_is_stable_between_reads() {
        let mut container = ServiceContainer::new();
        container.register(people()).unwrap();
        let first = container.service_class(ServiceType::of::<People>()).unwrap().unwrap();
        let second = container.service_class(ServiceType::of::<People>()).unwrap().unwrap();
        assert_eq!(first.method("get").unwrap().resolved_path(), Some("/people/:id"));
        assert_eq!(first.method("get").unwrap().resolved_path(), second.method("get").unwrap().resolved_path());
    }

    #[test]
    fn clean_reads_do_not_contend_for_the_upgradable_lock() {
        let mut container = ServiceContainer::new();
        container.register(people()).unwrap();
        container.paths().unwrap();

        // a refresh in progress elsewhere would hold this guard
        let held = container.registry.upgradable_read();
        assert_eq!(container.paths().unwrap(), ["/people", "/people/:id"]);
        assert_eq!(container.http_methods("/people/:id").unwrap(), [Method::Get]);
        drop(held);
    }

    #[test]
    fn unknown_verb_fails_registration() {
        let mut container = ServiceContainer::new();
        let service = ServiceDescriptor::new(ServiceType::of::<People>()).method(MethodDescriptor::new("brew").verb("BREW"));
        let err = container.register(service).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedMethod { ref method, .. } if method == "BREW"));
    }

    #[test]
    fn type_filter_limits_bound_services() {
        let mut container = ServiceContainer::new();
        container.register(people()).unwrap();
        container
            .register(ServiceDescriptor::new(ServiceType::of::<Orders>()).path("orders").method(MethodDescriptor::get("list")))
            .unwrap();

        let mut router = Router::new();
        container.build_services(&mut router, Some([ServiceType::of::<Orders>()].as_slice())).unwrap();
        assert_eq!(router.methods_at("/orders"), [Method::Get]);
        assert!(router.methods_at("/people").is_empty());
        assert_eq!(router.fallbacks_at("/orders"), 1);
    }

    #[test]
    fn second_build_on_the_same_router_fails() {
        let mut container = ServiceContainer::new();
        container.register(people()).unwrap();
        let mut router = Router::new();
        container.build_services(&mut router, None).unwrap();
        let err = container.build_services(&mut router, None).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateRoute { .. }));

        let mut other = Router::new();
        container.build_services(&mut other, None).unwrap();
    }

    #[test]
    fn method_without_verb_cannot_be_bound() {
        let mut container = ServiceContainer::new();
        container
            .register(ServiceDescriptor::new(ServiceType::of::<People>()).method(MethodDescriptor::new("helper")))
            .unwrap();
        let err = container.build_services(&mut Router::new(), None).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedMethod { .. }));
    }

    struct Broken;

    impl ServiceModule for Broken {
        fn name(&self) -> &str { "services/broken" }

        fn services(&self) -> Vec<ServiceDescriptor> {
            vec![
                ServiceDescriptor::new(ServiceType::of::<People>()).method(MethodDescriptor::get("a")),
                ServiceDescriptor::new(ServiceType::of::<Orders>()).method(MethodDescriptor::get("b")),
            ]
        }
    }

    #[test]
    fn load_failures_name_the_module() {
        let mut container = ServiceContainer::new();
        let err = container.load_services(&mut Router::new(), &[&Broken]).unwrap_err();
        assert!(err.to_string().starts_with("Error loading services for pattern: services/broken."));
        assert!(matches!(err, BuildError::LoadServices { ref source, .. } if matches!(**source, BuildError::DuplicateRoute { .. })));
    }
}
