//! End-to-end behaviour of registered services on the bundled router.

use std::sync::Arc;

use http::StatusCode;
use tsu_services::middleware::{BoxFuture, Exchange, Flow, Middleware};
use tsu_services::{
    BuildError, Method, MethodDescriptor, ParamKind, PostProcessor, PreProcessor, Request, Response, Router,
    ServiceContainer, ServiceDescriptor, ServiceError, ServiceType,
};

#[derive(Default)]
struct People;

async fn list(_svc: Arc<People>, _req: Request) -> Result<&'static str, ServiceError> {
    Ok("everyone")
}

async fn add(_svc: Arc<People>, req: Request) -> Result<Response, ServiceError> {
    let name = req.json().and_then(|v| v["name"].as_str()).unwrap_or("anonymous");
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", &format!("/people/{name}"))
        .text(name))
}

async fn get(_svc: Arc<People>, req: Request) -> Result<String, ServiceError> {
    Ok(format!("person {}", req.param("id").unwrap_or_default()))
}

async fn trace(_svc: Arc<People>, req: Request) -> Result<String, ServiceError> {
    Ok(req.headers().get_all("x-trace").iter().filter_map(|v| v.to_str().ok()).collect::<Vec<_>>().join(","))
}

fn tracer(name: &'static str) -> PreProcessor {
    PreProcessor::new(name, move |req: &mut Request| {
        req.headers_mut().append("x-trace", http::HeaderValue::from_static(name));
        Ok(())
    })
}

fn people() -> ServiceDescriptor {
    ServiceDescriptor::new(ServiceType::of::<People>())
        .path("people")
        .method(MethodDescriptor::get("list").handler(list))
        .method(MethodDescriptor::post("add").param(ParamKind::Body, "person", "Person").handler(add))
        .method(MethodDescriptor::get("get").path(":id").handler(get))
}

fn bound(descriptors: Vec<ServiceDescriptor>) -> Router {
    let mut container = ServiceContainer::new();
    for descriptor in descriptors {
        container.register(descriptor).unwrap();
    }
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();
    router
}

#[tokio::test]
async fn routes_reach_their_handlers() {
    let router = bound(vec![people()]);

    let res = router.handle(Request::new(http::Method::GET, "/people")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"everyone");

    let res = router.handle(Request::new(http::Method::GET, "/people/42")).await;
    assert_eq!(res.body().as_ref(), b"person 42");
}

#[tokio::test]
async fn json_bodies_are_parsed_for_body_params() {
    let router = bound(vec![people()]);
    let req = Request::new(http::Method::POST, "/people")
        .with_header("content-type", "application/json")
        .with_body(r#"{"name":"alice"}"#);
    let res = router.handle(req).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(res.header("location"), Some("/people/alice"));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let router = bound(vec![people()]);
    let req = Request::new(http::Method::POST, "/people")
        .with_header("content-type", "application/json")
        .with_body("{oops");
    assert_eq!(router.handle(req).await.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unmapped_verb_is_method_not_allowed() {
    let router = bound(vec![people()]);
    let res = router.handle(Request::new(http::Method::DELETE, "/people")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.header("allow"), Some("GET, POST"));

    let res = router.handle(Request::new(http::Method::PUT, "/people/7")).await;
    assert_eq!(res.header("allow"), Some("GET"));
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let router = bound(vec![people()]);
    let res = router.handle(Request::new(http::Method::GET, "/orders")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn last_declared_pre_processor_runs_first() {
    #[derive(Default)]
    struct Traced;

    async fn traced(_svc: Arc<Traced>, req: Request) -> Result<String, ServiceError> {
        trace(Arc::new(People), req).await
    }

    let router = bound(vec![
        ServiceDescriptor::new(ServiceType::of::<Traced>())
            .path("traced")
            .pre_processor(tracer("class"))
            .method(MethodDescriptor::get("run").pre_processor(tracer("f1")).pre_processor(tracer("f2")).handler(traced)),
    ]);

    let res = router.handle(Request::new(http::Method::GET, "/traced")).await;
    assert_eq!(res.body().as_ref(), b"f2,f1,class");
}

#[tokio::test]
async fn post_processors_see_the_service_response() {
    let stamp = PostProcessor::new("stamp", |_: &Request, res: &mut Response| {
        res.set_header("x-stamp", "done");
        Ok(())
    });
    let router = bound(vec![people().post_processor(stamp)]);
    let res = router.handle(Request::new(http::Method::GET, "/people")).await;
    assert_eq!(res.header("x-stamp"), Some("done"));
}

#[tokio::test]
async fn failed_pre_processor_skips_service_and_post_processors() {
    let deny = PreProcessor::new("deny", |_: &mut Request| Err(ServiceError::BadRequest("userId not present".into())));
    let stamp = PostProcessor::new("stamp", |_: &Request, res: &mut Response| {
        res.set_header("x-stamp", "done");
        Ok(())
    });
    let router = bound(vec![people().pre_processor(deny).post_processor(stamp)]);
    let res = router.handle(Request::new(http::Method::GET, "/people")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert!(res.header("x-stamp").is_none());
}

struct Marker;

impl Middleware for Marker {
    fn name(&self) -> &'static str { "marker" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            exchange.response.set_header("x-after", "yes");
            Ok(Flow::Next)
        })
    }
}

#[tokio::test]
async fn ignore_next_middlewares_stops_after_the_route() {
    use tsu_services::RouteTarget;

    let mut container = ServiceContainer::new();
    container.register(people()).unwrap();
    container
        .annotate_method(ServiceType::of::<People>(), "get", tsu_services::Annotation::IgnoreNextMiddlewares)
        .unwrap();
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();
    router.all("/people", Arc::new(Marker)).unwrap();
    router.all("/people/:id", Arc::new(Marker)).unwrap();

    let res = router.handle(Request::new(http::Method::GET, "/people")).await;
    assert_eq!(res.header("x-after"), Some("yes"));

    let res = router.handle(Request::new(http::Method::GET, "/people/1")).await;
    assert!(res.header("x-after").is_none());
}

#[test]
fn conflicting_declarations_fail_before_binding() {
    #[derive(Default)]
    struct Clones;

    let mut container = ServiceContainer::new();
    container.register(people()).unwrap();
    container
        .register(ServiceDescriptor::new(ServiceType::of::<Clones>()).path("/people/").method(MethodDescriptor::get("all")))
        .unwrap();

    let err = container.build_services(&mut Router::new(), None).unwrap_err();
    assert_eq!(err.to_string(), "Duplicated declaration for path [/people], method [GET].");
}

#[test]
fn building_twice_on_one_router_fails() {
    let mut container = ServiceContainer::new();
    container.register(people()).unwrap();
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();
    assert!(matches!(container.build_services(&mut router, None), Err(BuildError::DuplicateRoute { .. })));
}

#[test]
fn paths_and_verbs_are_queryable() {
    let mut container = ServiceContainer::new();
    container.register(people()).unwrap();
    assert_eq!(container.paths().unwrap(), ["/people", "/people/:id"]);
    assert_eq!(container.http_methods("/people").unwrap(), [Method::Get, Method::Post]);
}

#[tokio::test]
async fn head_is_answered_by_the_get_route() {
    let router = bound(vec![people()]);
    let res = router.handle(Request::new(http::Method::HEAD, "/people/7")).await;
    assert_eq!(res.status_code(), StatusCode::OK);

    let res = router.handle(Request::new(http::Method::OPTIONS, "/people/7")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
}
