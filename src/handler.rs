//! Service handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! Every [`MethodMetadata`](crate::metadata::MethodMetadata) may carry the async
//! function that implements it. Those functions have different concrete types
//! (and different service types `S`), so they are stored behind one trait object:
//!
//! ```text
//! async fn get(svc: Arc<People>, req: Request) -> Result<R, ServiceError>   ← user writes this
//!        ↓ MethodDescriptor::get("get").handler(get)
//! get.into_boxed_handler()                            ← Handler<S> blanket impl
//!        ↓
//! Arc::new(FnHandler(get, PhantomData::<People>))     ← stored as BoxedHandler
//!        ↓
//! handler.call(instance, req)  at request time        ← instance: Arc<dyn Any>
//!        ↓
//! downcast to Arc<People>, await, into_response()
//! ```
//!
//! The instance comes from the container's [`ServiceFactory`](crate::ServiceFactory),
//! so a handler never builds its own service object.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::metadata::{ServiceInstance, ServiceType};
use crate::middleware::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    /// The `S` of the `Handler<S>` this was built from.
    fn service(&self) -> ServiceType;

    fn call(&self, instance: ServiceInstance, req: Request) -> BoxFuture<'static, Result<Response, ServiceError>>;
}

/// A type-erased handler shared by every request routed to its method.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid service handler of service type `S`.
///
/// You never implement this yourself. It is satisfied by any function with the
/// signature:
///
/// ```text
/// async fn name(service: Arc<S>, req: Request) -> Result<impl IntoResponse, ServiceError>
/// ```
pub trait Handler<S>: private::Sealed<S> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed<S> {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<S, F, Fut, R> private::Sealed<S> for F
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<S, F, Fut, R> Handler<S> for F
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self, PhantomData::<fn() -> S>))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler `F` for service `S` and bridges it to [`ErasedHandler`].
struct FnHandler<F, S>(F, PhantomData<fn() -> S>);

impl<S, F, Fut, R> ErasedHandler for FnHandler<F, S>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn service(&self) -> ServiceType {
        ServiceType::abstract_of::<S>()
    }

    fn call(&self, instance: ServiceInstance, req: Request) -> BoxFuture<'static, Result<Response, ServiceError>> {
        let service = match instance.downcast::<S>() {
            Ok(service) => service,
            Err(_) => {
                let expected = std::any::type_name::<S>();
                return Box::pin(async move {
                    Err(ServiceError::Internal(format!("service instance is not a `{expected}`")))
                });
            }
        };
        let fut = (self.0)(service, req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}
