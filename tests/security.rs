//! Authentication and role checks on secured services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::StatusCode;
use tsu_services::middleware::{BoxFuture, BoxedMiddleware, Exchange, Flow, Middleware};
use tsu_services::{
    Authenticator, BuildError, MethodDescriptor, Request, RouteTarget, Router, ServiceContainer, ServiceDescriptor,
    ServiceError, ServiceType,
};

/// Callers authenticate with `authorization: user <name>` and carry their roles in
/// `x-roles`.
#[derive(Default)]
struct HeaderAuth {
    initialized: Arc<AtomicUsize>,
}

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
    fn initialize(&self, _router: &mut dyn RouteTarget) -> Result<(), BuildError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn middleware(&self) -> BoxedMiddleware {
        Arc::new(RequireUser)
    }

    fn roles(&self, request: &Request) -> Vec<String> {
        request.header("x-roles").map(|v| v.split(',').map(str::to_owned).collect()).unwrap_or_default()
    }
}

#[derive(Default)]
struct Admin;

async fn report(_svc: Arc<Admin>, _req: Request) -> Result<&'static str, ServiceError> {
    Ok("report")
}

async fn profile(_svc: Arc<Admin>, _req: Request) -> Result<&'static str, ServiceError> {
    Ok("profile")
}

async fn open(_svc: Arc<Admin>, _req: Request) -> Result<&'static str, ServiceError> {
    Ok("open")
}

fn router(auth: HeaderAuth) -> Router {
    let mut container = ServiceContainer::new().authenticator(auth);
    container
        .register(
            ServiceDescriptor::new(ServiceType::of::<Admin>())
                .path("admin")
                .method(MethodDescriptor::get("report").path("report").security(["ADMIN"]).handler(report))
                .method(MethodDescriptor::get("profile").path("me").security(Vec::<String>::new()).handler(profile))
                .method(MethodDescriptor::get("open").path("open").handler(open)),
        )
        .unwrap();
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();
    router
}

fn get(path: &str, auth: Option<&str>, roles: &str) -> Request {
    let req = Request::new(http::Method::GET, path).with_header("x-roles", roles);
    match auth {
        Some(auth) => req.with_header("authorization", auth),
        None => req,
    }
}

#[tokio::test]
async fn missing_credentials_are_rejected_before_the_role_check() {
    let res = router(HeaderAuth::default()).handle(get("/admin/report", None, "ADMIN")).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn caller_without_declared_role_is_forbidden() {
    let res = router(HeaderAuth::default()).handle(get("/admin/report", Some("user bob"), "USER")).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn one_matching_role_is_enough() {
    let res = router(HeaderAuth::default()).handle(get("/admin/report", Some("user ann"), "USER,ADMIN")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"report");
}

#[tokio::test]
async fn wildcard_admits_any_authenticated_caller() {
    let router = router(HeaderAuth::default());
    let res = router.handle(get("/admin/me", Some("user bob"), "")).await;
    assert_eq!(res.body().as_ref(), b"profile");

    let res = router.handle(get("/admin/me", None, "")).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn undeclared_routes_stay_public() {
    let res = router(HeaderAuth::default()).handle(get("/admin/open", None, "")).await;
    assert_eq!(res.body().as_ref(), b"open");
}

#[test]
fn authenticator_is_initialized_once_per_build() {
    let count = Arc::new(AtomicUsize::new(0));
    router(HeaderAuth { initialized: Arc::clone(&count) });
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn class_roles_combine_with_method_roles() {
    #[derive(Default)]
    struct Billing;

    async fn invoices(_svc: Arc<Billing>, _req: Request) -> Result<&'static str, ServiceError> {
        Ok("invoices")
    }

    let mut container = ServiceContainer::new().authenticator(HeaderAuth::default());
    container
        .register(
            ServiceDescriptor::new(ServiceType::of::<Billing>())
                .path("billing")
                .security(["FINANCE"])
                .method(MethodDescriptor::get("invoices").security(["AUDIT"]).handler(invoices)),
        )
        .unwrap();
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();

    for roles in ["FINANCE", "AUDIT"] {
        let res = router.handle(get("/billing", Some("user x"), roles)).await;
        assert_eq!(res.status_code(), StatusCode::OK, "role {roles}");
    }
    let res = router.handle(get("/billing", Some("user x"), "USER")).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
}
