//! Multipart uploads routed through a container.

use std::sync::Arc;

use http::StatusCode;
use tsu_services::middleware::upload::FileLimits;
use tsu_services::{MethodDescriptor, Request, Router, ServiceContainer, ServiceDescriptor, ServiceError, ServiceType};

const BOUNDARY: &str = "X-BOUNDARY";

#[derive(Default)]
struct Avatars;

async fn upload(_svc: Arc<Avatars>, req: Request) -> Result<String, ServiceError> {
    let file = req.files("avatar").first().ok_or_else(|| ServiceError::BadRequest("no avatar".into()))?;
    let on_disk = match &file.path {
        Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| ServiceError::Internal(e.to_string()))?,
        None => String::new(),
    };
    Ok(format!("{} {} {} {}", req.form_value("note").unwrap_or("-"), file.file_name, file.size, on_disk))
}

fn multipart(parts: &[(&str, Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (name, file_name, value) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        match file_name {
            Some(file_name) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
            )),
            None => body.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")),
        }
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn post(body: String) -> Request {
    Request::new(http::Method::POST, "/avatars")
        .with_header("content-type", &format!("multipart/form-data; boundary={BOUNDARY}"))
        .with_body(body)
}

fn router(container: ServiceContainer) -> Router {
    let mut container = container;
    container
        .register(
            ServiceDescriptor::new(ServiceType::of::<Avatars>())
                .path("avatars")
                .method(MethodDescriptor::post("upload").file("avatar").handler(upload)),
        )
        .unwrap();
    let mut router = Router::new();
    container.build_services(&mut router, None).unwrap();
    router
}

#[tokio::test]
async fn files_are_written_to_the_destination() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(ServiceContainer::new().file_dest(dir.path()));

    let res = router
        .handle(post(multipart(&[("note", None, "hi"), ("avatar", Some("me.txt"), "pixels")])))
        .await;

    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"hi me.txt 6 pixels");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn a_second_file_on_a_single_file_field_is_rejected() {
    let router = router(ServiceContainer::new());
    let res = router
        .handle(post(multipart(&[("avatar", Some("a.txt"), "a"), ("avatar", Some("b.txt"), "b")])))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn undeclared_file_fields_are_rejected() {
    let router = router(ServiceContainer::new());
    let res = router.handle(post(multipart(&[("resume", Some("cv.txt"), "cv")]))).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_files_are_rejected() {
    let limits = FileLimits { file_size: Some(3), ..FileLimits::default() };
    let router = router(ServiceContainer::new().file_limits(limits));
    let res = router.handle(post(multipart(&[("avatar", Some("big.txt"), "too large")]))).await;
    assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn filtered_files_are_skipped() {
    let filter: tsu_services::middleware::upload::FileFilter =
        Arc::new(|_: &Request, info: &tsu_services::middleware::upload::FileInfo| Ok(!info.file_name.ends_with(".exe")));
    let router = router(ServiceContainer::new().file_filter(filter));
    let res = router.handle(post(multipart(&[("avatar", Some("virus.exe"), "x")]))).await;
    // the handler sees no file at all
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(res.body().as_ref(), b"Bad Request: no avatar");
}

#[tokio::test]
async fn rejected_requests_leave_nothing_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let single = router(ServiceContainer::new().file_dest(dir.path()));
    let res = single
        .handle(post(multipart(&[("avatar", Some("a.txt"), "a"), ("avatar", Some("b.txt"), "b")])))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let limits = FileLimits { fields: Some(0), ..FileLimits::default() };
    let no_fields = router(ServiceContainer::new().file_dest(dir.path()).file_limits(limits));
    let res = no_fields
        .handle(post(multipart(&[("avatar", Some("a.txt"), "a"), ("note", None, "too many")])))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
