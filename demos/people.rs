//! A small people directory served by a service container.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example people
//!   TSU_CONFIG=services.toml RUST_LOG=debug cargo run --example people
//!
//! Try:
//!   curl http://localhost:3000/people
//!   curl http://localhost:3000/people/1
//!   curl -X POST http://localhost:3000/people \
//!        -H 'content-type: application/json' -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/people          # 405, Allow: GET, POST
//!   curl -X DELETE http://localhost:3000/people/1 \
//!        -H 'authorization: user root' -H 'x-roles: ADMIN'

use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use tsu_services::middleware::{BoxFuture, BoxedMiddleware, Exchange, Flow, Middleware};
use tsu_services::{
    Authenticator, MethodDescriptor, ParamKind, PostProcessor, Request, Response, Router, Server, ServiceConfig,
    ServiceContainer, ServiceDescriptor, ServiceError, ServiceFactory, ServiceInstance, ServiceModule, ServiceType,
    shutdown_signal,
};

#[derive(Default)]
struct People {
    names: Mutex<Vec<String>>,
}

async fn list(svc: Arc<People>, _req: Request) -> Result<Response, ServiceError> {
    let names = svc.names.lock().clone();
    let body = serde_json::to_vec(&names).map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(Response::json(body))
}

async fn get(svc: Arc<People>, req: Request) -> Result<String, ServiceError> {
    let id: usize = req.param("id").and_then(|id| id.parse().ok()).ok_or(ServiceError::NotFound)?;
    svc.names.lock().get(id).cloned().ok_or(ServiceError::NotFound)
}

async fn add(svc: Arc<People>, req: Request) -> Result<Response, ServiceError> {
    let name = req
        .json()
        .and_then(|v| v["name"].as_str())
        .ok_or_else(|| ServiceError::BadRequest("missing `name`".into()))?
        .to_owned();
    let mut names = svc.names.lock();
    names.push(name);
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", &format!("/people/{}", names.len() - 1))
        .no_body())
}

async fn remove(svc: Arc<People>, req: Request) -> Result<Response, ServiceError> {
    let id: usize = req.param("id").and_then(|id| id.parse().ok()).ok_or(ServiceError::NotFound)?;
    let mut names = svc.names.lock();
    if id >= names.len() {
        return Err(ServiceError::NotFound);
    }
    names.remove(id);
    Ok(Response::status(StatusCode::NO_CONTENT))
}

/// Hands out one shared `People`, so the directory outlives a single request.
#[derive(Default)]
struct Singletons {
    people: Arc<People>,
}

impl ServiceFactory for Singletons {
    fn create(&self, service: ServiceType) -> Result<ServiceInstance, ServiceError> {
        if service.is::<People>() {
            Ok(Arc::clone(&self.people) as ServiceInstance)
        } else {
            service.construct().ok_or_else(|| ServiceError::Internal(format!("cannot build {}", service.name())))
        }
    }
}

struct Directory;

impl ServiceModule for Directory {
    fn name(&self) -> &str { "directory" }

    fn services(&self) -> Vec<ServiceDescriptor> {
        let served_by = PostProcessor::new("served-by", |_: &Request, res: &mut Response| {
            res.set_header("x-served-by", "people-demo");
            Ok(())
        });
        vec![
            ServiceDescriptor::new(ServiceType::of::<People>())
                .path("people")
                .post_processor(served_by)
                .method(MethodDescriptor::get("list").handler(list))
                .method(MethodDescriptor::get("get").path(":id").handler(get))
                .method(MethodDescriptor::post("add").param(ParamKind::Body, "person", "Person").handler(add))
                .method(MethodDescriptor::delete("remove").path(":id").security(["ADMIN"]).handler(remove)),
        ]
    }
}

/// Trusts `authorization: user <name>` and reads roles from `x-roles`.
struct HeaderAuth;

struct RequireUser;

impl Middleware for RequireUser {
    fn name(&self) -> &'static str { "header-auth" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            match exchange.request.header("authorization") {
                Some(value) if value.starts_with("user ") => Ok(Flow::Next),
                _ => Err(ServiceError::Unauthorized),
            }
        })
    }
}

impl Authenticator for HeaderAuth {
    fn middleware(&self) -> BoxedMiddleware {
        Arc::new(RequireUser)
    }

    fn roles(&self, request: &Request) -> Vec<String> {
        request.header("x-roles").map(|v| v.split(',').map(str::to_owned).collect()).unwrap_or_default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = match std::env::var("TSU_CONFIG") {
        Ok(path) => ServiceConfig::from_file(path)?,
        Err(_) => ServiceConfig::default(),
    };

    let mut container = ServiceContainer::from_config(&config)
        .service_factory(Singletons::default())
        .authenticator(HeaderAuth);
    let mut router = Router::new();
    container.load_services(&mut router, &[&Directory])?;

    Server::bind("0.0.0.0:3000").await?.serve(router, shutdown_signal()).await?;
    Ok(())
}
