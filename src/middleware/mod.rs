//! Middleware layer.
//!
//! A route is bound to a [`Pipeline`]: an ordered list of [`Middleware`] stages
//! run strictly one after the other for each request. A stage either lets the
//! request continue ([`Flow::Next`]), ends the pipeline with the response it has
//! produced ([`Flow::Halt`]), or fails with a [`ServiceError`], which skips every
//! remaining stage and goes straight to the router's error handler.
//!
//! The stages the container assembles live in the submodules:
//! - [`security`]: role check after the authenticator's own stage
//! - [`parsers`]: cookie, raw-body, JSON and urlencoded-form decoding
//! - [`upload`]: multipart files on a shared [`Uploader`](upload::Uploader)
//! - [`service`]: pre-processors, the invocation stage, post-processors
//! - [`not_allowed`]: the per-path `405 Method Not Allowed` fallback

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::error::ServiceError;
use crate::request::Request;
use crate::response::Response;

pub mod not_allowed;
pub mod parsers;
pub mod security;
pub mod service;
pub mod upload;

/// A boxed future, `Send` so tokio can move it across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A stage shared by every request routed through it.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// What the pipeline does after a stage succeeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Run the next stage (or, after the last stage, the next router layer).
    Next,
    /// Stop here; the response on the exchange is final.
    Halt,
}

/// The per-request state every stage works on.
#[derive(Debug, Default)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self { request, response: Response::default() }
    }
}

/// One pipeline stage.
///
/// Stages are built once and shared across concurrent requests: they must not
/// keep per-request state between calls.
pub trait Middleware: Send + Sync + 'static {
    /// Stage name, used in logs and by [`Pipeline::stage_names`].
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>>;
}

/// The ordered stages bound to one route.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
    ignore_next: bool,
}

impl Pipeline {
    pub fn new(stages: Vec<BoxedMiddleware>) -> Self {
        Self { stages, ignore_next: false }
    }

    /// A pipeline of exactly one stage.
    pub fn single(stage: BoxedMiddleware) -> Self {
        Self::new(vec![stage])
    }

    /// When set, a pipeline that completes does not hand over to later router
    /// layers for the same path.
    pub fn ignore_next_middlewares(mut self, ignore: bool) -> Self {
        self.ignore_next = ignore;
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn ignores_next(&self) -> bool { self.ignore_next }
    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Runs every stage in order, stopping at the first halt or failure.
    pub async fn run(&self, exchange: &mut Exchange) -> Result<Flow, ServiceError> {
        for stage in &self.stages {
            trace!(stage = stage.name(), path = %exchange.request.path(), "running stage");
            if stage.handle(exchange).await? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
        Ok(if self.ignore_next { Flow::Halt } else { Flow::Next })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records its name into a shared log, then answers with a fixed outcome.
    pub(crate) struct Recorder {
        pub name: &'static str,
        pub log: Arc<Mutex<Vec<&'static str>>>,
        pub outcome: fn() -> Result<Flow, ServiceError>,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str { self.name }

        fn handle<'a>(&'a self, _exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
            self.log.lock().unwrap().push(self.name);
            Box::pin(async move { (self.outcome)() })
        }
    }

    pub(crate) fn recording(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        outcome: fn() -> Result<Flow, ServiceError>,
    ) -> BoxedMiddleware {
        Arc::new(Recorder { name, log: Arc::clone(log), outcome })
    }
}
