//! Request decoding stages.
//!
//! Each parser fills one slot on the [`Request`](crate::Request) and leaves the
//! original body untouched, so raw and structured decoding can both run on the
//! same request. A body whose media type the parser does not accept is skipped,
//! not rejected: the slot simply stays empty.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::ServiceError;
use crate::metadata::BodyOptions;
use crate::middleware::{BoxFuture, Exchange, Flow, Middleware};
use crate::request::Request;

/// Body limit used when neither the route nor the configuration sets one.
pub const DEFAULT_BODY_LIMIT: usize = 100 * 1024;

/// Turns a raw cookie value into its decoded form; `None` keeps the raw value.
pub type CookieDecoder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

// ── Shared body checks ────────────────────────────────────────────────────────

struct BodyRules {
    limit: usize,
    types: Vec<String>,
}

impl BodyRules {
    fn new(options: Option<&BodyOptions>, default_limit: usize, default_type: &str) -> Self {
        let limit = options.and_then(|o| o.limit).unwrap_or(default_limit);
        let types = options
            .and_then(|o| o.types.clone())
            .unwrap_or_else(|| vec![default_type.to_owned()]);
        Self { limit, types }
    }

    /// `Ok(false)` when the stage should leave this request alone.
    fn admit(&self, req: &Request) -> Result<bool, ServiceError> {
        let Some(content_type) = req.content_type() else { return Ok(false) };
        if !self.types.iter().any(|t| type_matches(&content_type, t)) {
            return Ok(false);
        }
        if req.body().len() > self.limit {
            return Err(ServiceError::PayloadTooLarge { limit: self.limit });
        }
        Ok(true)
    }
}

/// `application/json`, `text/*` and `*/*` style patterns.
fn type_matches(content_type: &mime::Mime, pattern: &str) -> bool {
    match pattern.split_once('/') {
        Some(("*", "*")) => true,
        Some((ty, "*")) => content_type.type_().as_str().eq_ignore_ascii_case(ty),
        _ => content_type.essence_str().eq_ignore_ascii_case(pattern),
    }
}

// ── Cookies ───────────────────────────────────────────────────────────────────

/// Parses the `Cookie` header into [`Request::cookies`].
pub struct CookieParser {
    decoder: Option<CookieDecoder>,
}

impl CookieParser {
    pub fn new(decoder: Option<CookieDecoder>) -> Self {
        Self { decoder }
    }

    fn decode(&self, value: &str) -> String {
        let decoded = match &self.decoder {
            Some(decode) => decode(value),
            None => urlencoding::decode(value).ok().map(|v| v.into_owned()),
        };
        decoded.unwrap_or_else(|| value.to_owned())
    }

    fn parse(&self, req: &Request) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        for header in req.headers().get_all(http::header::COOKIE) {
            let Ok(header) = header.to_str() else { continue };
            for pair in header.split(';') {
                let Some((name, value)) = pair.split_once('=') else { continue };
                let name = name.trim();
                if name.is_empty() || cookies.contains_key(name) {
                    continue;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                cookies.insert(name.to_owned(), self.decode(value));
            }
        }
        cookies
    }
}

impl Middleware for CookieParser {
    fn name(&self) -> &'static str { "cookie-parser" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            if exchange.request.cookies.is_none() {
                exchange.request.cookies = Some(self.parse(&exchange.request));
            }
            Ok(Flow::Next)
        })
    }
}

// ── Raw body ──────────────────────────────────────────────────────────────────

/// Exposes the untouched body as [`Request::raw_body`].
pub struct RawBodyParser {
    rules: BodyRules,
}

impl RawBodyParser {
    pub fn new(options: Option<&BodyOptions>, default_limit: usize) -> Self {
        Self { rules: BodyRules::new(options, default_limit, "application/octet-stream") }
    }
}

impl Middleware for RawBodyParser {
    fn name(&self) -> &'static str { "raw-body-parser" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            if self.rules.admit(&exchange.request)? {
                exchange.request.raw_body = Some(exchange.request.body.clone());
            }
            Ok(Flow::Next)
        })
    }
}

// ── JSON ──────────────────────────────────────────────────────────────────────

/// Parses a JSON body into [`Request::json`]. An empty body parses as `{}`.
pub struct JsonBodyParser {
    rules: BodyRules,
}

impl JsonBodyParser {
    pub fn new(options: Option<&BodyOptions>, default_limit: usize) -> Self {
        Self { rules: BodyRules::new(options, default_limit, "application/json") }
    }
}

impl Middleware for JsonBodyParser {
    fn name(&self) -> &'static str { "json-parser" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            if !self.rules.admit(&exchange.request)? {
                return Ok(Flow::Next);
            }
            let body = exchange.request.body();
            let value = if body.iter().all(u8::is_ascii_whitespace) {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_slice(body).map_err(|e| ServiceError::BadRequest(e.to_string()))?
            };
            trace!(bytes = body.len(), "json body parsed");
            exchange.request.json = Some(value);
            Ok(Flow::Next)
        })
    }
}

// ── URL-encoded forms ─────────────────────────────────────────────────────────

/// Parses `application/x-www-form-urlencoded` bodies into [`Request::form`].
pub struct FormParser {
    rules: BodyRules,
}

impl FormParser {
    pub fn new(options: Option<&BodyOptions>, default_limit: usize) -> Self {
        Self { rules: BodyRules::new(options, default_limit, "application/x-www-form-urlencoded") }
    }
}

impl Middleware for FormParser {
    fn name(&self) -> &'static str { "form-parser" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            if !self.rules.admit(&exchange.request)? {
                return Ok(Flow::Next);
            }
            let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(exchange.request.body())
                .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
            exchange.request.append_form(fields);
            Ok(Flow::Next)
        })
    }
}
