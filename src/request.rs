//! Incoming HTTP request type.
//!
//! Besides the raw parts, a request carries one slot per parser stage. A slot is
//! `None` until the matching stage has run, so an invoker can tell "not parsed"
//! apart from "parsed and empty".

use std::collections::HashMap;

use bytes::Bytes;
use http::{Extensions, HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;

use crate::middleware::upload::UploadedFile;

/// An incoming HTTP request as seen by the pipeline stages.
#[derive(Clone, Debug, Default)]
pub struct Request {
    pub(crate) method: http::Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) cookies: Option<HashMap<String, String>>,
    pub(crate) raw_body: Option<Bytes>,
    pub(crate) json: Option<serde_json::Value>,
    pub(crate) form: Option<Vec<(String, String)>>,
    pub(crate) files: Option<IndexMap<String, Vec<UploadedFile>>>,
    extensions: Extensions,
}

impl Request {
    /// Builds a request for `target`, which may carry a query string.
    pub fn new(method: http::Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        Self { method, path, query, ..Self::default() }
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers: parts.headers,
            body,
            ..Self::default()
        }
    }

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header lookup; `HeaderMap` is already case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/people/:id`, `req.param("id")` on `/people/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The parsed `content-type` header.
    pub fn content_type(&self) -> Option<mime::Mime> {
        self.header("content-type").and_then(|v| v.parse().ok())
    }

    /// Decoded cookies, once the cookie stage has run.
    pub fn cookies(&self) -> Option<&HashMap<String, String>> { self.cookies.as_ref() }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.as_ref()?.get(name).map(String::as_str)
    }

    /// The untouched body, once the raw-body stage has run.
    pub fn raw_body(&self) -> Option<&Bytes> { self.raw_body.as_ref() }

    /// The parsed JSON document, once the JSON stage has run.
    pub fn json(&self) -> Option<&serde_json::Value> { self.json.as_ref() }

    /// Form fields in arrival order, once the form or upload stage has run.
    pub fn form(&self) -> Option<&[(String, String)]> { self.form.as_deref() }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.as_ref()?.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Uploaded files for one field.
    pub fn files(&self, field: &str) -> &[UploadedFile] {
        self.files.as_ref().and_then(|f| f.get(field)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Free-form slots for collaborators (an authenticator's principal, for one).
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    pub(crate) fn append_form(&mut self, fields: Vec<(String, String)>) {
        self.form.get_or_insert_with(Vec::new).extend(fields);
    }
}
