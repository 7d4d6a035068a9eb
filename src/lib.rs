//! # tsu-services
//!
//! Declarative services on top of the tsu router: describe service types and
//! their methods once, and the container turns the description into routes.
//!
//! ## What the container does
//!
//! - Collects per-type and per-method metadata, including metadata inherited
//!   from a registered parent type
//! - Resolves every method to a concrete `(path, verb)` and refuses conflicting
//!   declarations before any traffic is served
//! - Assembles each route's middleware pipeline in a fixed order: authentication,
//!   role check, body and cookie decoding, uploads, pre-processors, the service
//!   call, post-processors
//! - Binds the pipelines onto a router and answers unmapped verbs on known paths
//!   with `405 Method Not Allowed` and an `Allow` header
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tsu_services::{
//!     MethodDescriptor, Request, Router, Server, ServiceContainer, ServiceDescriptor,
//!     ServiceError, ServiceType, shutdown_signal,
//! };
//!
//! #[derive(Default)]
//! struct People;
//!
//! async fn get(_svc: Arc<People>, req: Request) -> Result<String, ServiceError> {
//!     Ok(format!("person {}", req.param("id").unwrap_or_default()))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut container = ServiceContainer::new();
//!     container.register(
//!         ServiceDescriptor::new(ServiceType::of::<People>())
//!             .path("people")
//!             .method(MethodDescriptor::get("get").path(":id").handler(get)),
//!     )?;
//!
//!     let mut router = Router::new();
//!     container.build_services(&mut router, None)?;
//!
//!     Server::bind("0.0.0.0:3000").await?.serve(router, shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

mod annotation;
mod config;
mod container;
mod error;
mod handler;
mod metadata;
mod method;
mod paths;
mod pipeline;
mod registry;
mod request;
mod response;
mod router;
mod server;
mod service;

pub mod middleware;

pub use annotation::{Annotation, MethodDescriptor, ServiceDescriptor};
pub use config::{BodySettings, ConfigError, ServiceConfig, UploadSettings};
pub use container::{ServiceContainer, ServiceModule};
pub use error::{BuildError, BuildResult, ServiceError};
pub use handler::Handler;
pub use metadata::{
    BodyOptions, ClassMetadata, FileDescriptor, MethodMetadata, ParamDescriptor, ParamKind, PostProcessor,
    PreProcessor, ServiceInstance, ServiceType,
};
pub use method::Method;
pub use paths::{PathIndex, compose_path};
pub use pipeline::PipelineBuilder;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{DefaultErrorHandler, ErrorHandler, RouteTarget, Router};
pub use server::{Server, shutdown_signal};
pub use service::{
    Authenticator, DefaultServiceFactory, HandlerInvoker, ServiceContext, ServiceFactory, ServiceInvoker,
};
