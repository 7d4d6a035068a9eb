//! The per-path `405 Method Not Allowed` fallback.

use tracing::debug;

use crate::error::ServiceError;
use crate::method::{Method, allow_header};
use crate::middleware::{BoxFuture, Exchange, Flow, Middleware};

/// Installed once per bound path, after that path's routes.
///
/// Defers when a route already answered or the verb is one the path serves
/// (`HEAD` counts as served wherever `GET` is). Otherwise sets `Allow` and fails
/// with [`ServiceError::MethodNotAllowed`].
pub struct NotAllowed {
    allowed: Vec<Method>,
    allow: String,
}

impl NotAllowed {
    pub fn new(allowed: Vec<Method>) -> Self {
        let allow = allow_header(&allowed);
        Self { allowed, allow }
    }

    pub fn allow(&self) -> &str { &self.allow }
}

impl Middleware for NotAllowed {
    fn name(&self) -> &'static str { "not-allowed" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            let verb = exchange.request.method();
            let head_via_get = verb == http::Method::HEAD && self.allowed.contains(&Method::Get);
            if exchange.response.is_sent() || head_via_get || self.allowed.iter().any(|m| m.matches(verb)) {
                return Ok(Flow::Next);
            }
            debug!(method = %verb, path = %exchange.request.path(), allow = %self.allow, "method not allowed");
            exchange.response.set_header("allow", &self.allow);
            Err(ServiceError::MethodNotAllowed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::response::Response;

    fn exchange(verb: http::Method) -> Exchange {
        Exchange::new(Request::new(verb, "/people"))
    }

    #[tokio::test]
    async fn rejects_unmapped_verbs_with_allow_header() {
        let fallback = NotAllowed::new(vec![Method::Get, Method::Post]);
        let mut ex = exchange(http::Method::DELETE);
        let err = fallback.handle(&mut ex).await.unwrap_err();
        assert!(matches!(err, ServiceError::MethodNotAllowed));
        assert_eq!(ex.response.header("allow"), Some("GET, POST"));
    }

    #[tokio::test]
    async fn defers_for_allowed_verbs_and_sent_responses() {
        let fallback = NotAllowed::new(vec![Method::Get]);
        let mut allowed = exchange(http::Method::GET);
        assert_eq!(fallback.handle(&mut allowed).await.unwrap(), Flow::Next);

        let mut answered = exchange(http::Method::PUT);
        answered.response.send(Response::text("already"));
        assert_eq!(fallback.handle(&mut answered).await.unwrap(), Flow::Next);
        assert!(answered.response.header("allow").is_none());
    }

    #[tokio::test]
    async fn head_is_allowed_wherever_get_is() {
        let mut head = exchange(http::Method::HEAD);
        assert_eq!(NotAllowed::new(vec![Method::Get]).handle(&mut head).await.unwrap(), Flow::Next);

        let mut head = exchange(http::Method::HEAD);
        let err = NotAllowed::new(vec![Method::Post]).handle(&mut head).await.unwrap_err();
        assert!(matches!(err, ServiceError::MethodNotAllowed));
    }
}
