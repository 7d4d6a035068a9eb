//! The collaborators the container talks to while building and serving routes.
//!
//! | Trait | Used at | Job |
//! |---|---|---|
//! | [`ServiceFactory`] | build + request | canonical service identity, instance creation |
//! | [`Authenticator`] | build + request | challenge stage, caller roles |
//! | [`ServiceInvoker`] | request | run the business method, write the response |
//!
//! Defaults are provided for the factory ([`DefaultServiceFactory`]) and the
//! invoker ([`HandlerInvoker`]). There is no default authenticator: without one,
//! role declarations are ignored (and logged).

use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{BuildError, ServiceError};
use crate::metadata::{MethodMetadata, ServiceInstance, ServiceType};
use crate::middleware::{BoxFuture, BoxedMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::RouteTarget;

// ── ServiceFactory ────────────────────────────────────────────────────────────

/// Builds service instances and maps wrapper types onto the type they wrap.
pub trait ServiceFactory: Send + Sync + 'static {
    fn create(&self, service: ServiceType) -> Result<ServiceInstance, ServiceError>;

    /// The registry key for `service`. Proxies and wrappers around one logical
    /// service must map to the same key.
    fn target_class(&self, service: ServiceType) -> ServiceType {
        service
    }
}

/// Instantiates through the constructor captured by [`ServiceType::of`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultServiceFactory;

impl ServiceFactory for DefaultServiceFactory {
    fn create(&self, service: ServiceType) -> Result<ServiceInstance, ServiceError> {
        service.construct().ok_or_else(|| {
            ServiceError::Internal(format!("`{}` has no constructor", service.name()))
        })
    }
}

// ── Authenticator ─────────────────────────────────────────────────────────────

/// Identifies the caller of secured routes.
pub trait Authenticator: Send + Sync + 'static {
    /// Called once per build pass, before any route is bound. Authenticators that
    /// need their own routes (login callbacks and the like) register them here.
    fn initialize(&self, _router: &mut dyn RouteTarget) -> Result<(), BuildError> {
        Ok(())
    }

    /// The challenge/identify stage placed first in every secured pipeline.
    fn middleware(&self) -> BoxedMiddleware;

    /// Roles held by the caller of an already authenticated request.
    fn roles(&self, request: &Request) -> Vec<String>;
}

// ── ServiceContext ────────────────────────────────────────────────────────────

/// Request-scoped state handed to the [`ServiceInvoker`].
pub struct ServiceContext {
    pub request: Request,
    pub response: Response,
    target: ServiceType,
    method: Arc<MethodMetadata>,
    factory: Arc<dyn ServiceFactory>,
}

impl ServiceContext {
    pub(crate) fn new(
        request: Request,
        response: Response,
        target: ServiceType,
        method: Arc<MethodMetadata>,
        factory: Arc<dyn ServiceFactory>,
    ) -> Self {
        Self { request, response, target, method, factory }
    }

    pub fn target(&self) -> ServiceType { self.target }
    pub fn method(&self) -> &MethodMetadata { &self.method }

    /// Languages declared on the class and the method together.
    pub fn languages(&self) -> &IndexSet<String> { self.method.resolved_languages() }

    /// Media types declared on the class and the method together.
    pub fn accepts(&self) -> &IndexSet<String> { self.method.resolved_accepts() }

    /// A fresh business-object instance from the container's factory.
    pub fn instance(&self) -> Result<ServiceInstance, ServiceError> {
        self.factory.create(self.target)
    }

    pub(crate) fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }
}

// ── ServiceInvoker ────────────────────────────────────────────────────────────

/// Runs the business method for one request and writes its response.
pub trait ServiceInvoker: Send + Sync + 'static {
    fn call_service<'a>(&'a self, ctx: &'a mut ServiceContext) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// Calls the handler attached to the method with a fresh service instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandlerInvoker;

impl ServiceInvoker for HandlerInvoker {
    fn call_service<'a>(&'a self, ctx: &'a mut ServiceContext) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let handler = ctx.method.handler.clone().ok_or_else(|| {
                ServiceError::Internal(format!(
                    "no handler bound to `{}::{}`",
                    ctx.target.name(),
                    ctx.method.name()
                ))
            })?;
            let instance = ctx.instance()?;
            let response = handler.call(instance, ctx.request.clone()).await?;
            ctx.response.send(response);
            Ok(())
        })
    }
}
