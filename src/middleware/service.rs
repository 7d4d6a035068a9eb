//! The last three stages of every route: pre-processors, the service call,
//! post-processors.

use std::mem;
use std::sync::Arc;

use tracing::trace;

use crate::error::ServiceError;
use crate::metadata::{MethodMetadata, PostProcessor, PreProcessor, ServiceType};
use crate::middleware::{BoxFuture, Exchange, Flow, Middleware};
use crate::service::{ServiceContext, ServiceFactory, ServiceInvoker};

/// Runs request transforms in list order.
pub struct PreProcessors {
    list: Vec<PreProcessor>,
}

impl PreProcessors {
    pub fn new(list: Vec<PreProcessor>) -> Self {
        Self { list }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.list.iter().map(PreProcessor::name).collect()
    }
}

impl Middleware for PreProcessors {
    fn name(&self) -> &'static str { "pre-processors" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            for processor in &self.list {
                trace!(processor = processor.name(), "pre-processing");
                processor.apply(&mut exchange.request)?;
            }
            Ok(Flow::Next)
        })
    }
}

/// Hands the request to the [`ServiceInvoker`].
///
/// `target` is the type instances are built from: the method's
/// [`owner`](MethodMetadata::owner), which differs from the bound service for
/// inherited methods.
pub struct ServiceStage {
    target: ServiceType,
    method: Arc<MethodMetadata>,
    invoker: Arc<dyn ServiceInvoker>,
    factory: Arc<dyn ServiceFactory>,
}

impl ServiceStage {
    pub fn new(
        target: ServiceType,
        method: Arc<MethodMetadata>,
        invoker: Arc<dyn ServiceInvoker>,
        factory: Arc<dyn ServiceFactory>,
    ) -> Self {
        Self { target, method, invoker, factory }
    }

    pub fn method(&self) -> &MethodMetadata { &self.method }
}

impl Middleware for ServiceStage {
    fn name(&self) -> &'static str { "service" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            let mut ctx = ServiceContext::new(
                mem::take(&mut exchange.request),
                mem::take(&mut exchange.response),
                self.target,
                Arc::clone(&self.method),
                Arc::clone(&self.factory),
            );
            let outcome = self.invoker.call_service(&mut ctx).await;
            (exchange.request, exchange.response) = ctx.into_parts();
            outcome?;
            Ok(Flow::Next)
        })
    }
}

/// Runs response transforms in list order.
pub struct PostProcessors {
    list: Vec<PostProcessor>,
}

impl PostProcessors {
    pub fn new(list: Vec<PostProcessor>) -> Self {
        Self { list }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.list.iter().map(PostProcessor::name).collect()
    }
}

impl Middleware for PostProcessors {
    fn name(&self) -> &'static str { "post-processors" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            for processor in &self.list {
                trace!(processor = processor.name(), "post-processing");
                processor.apply(&exchange.request, &mut exchange.response)?;
            }
            Ok(Flow::Next)
        })
    }
}
