//! Per-class and per-method descriptor records.
//!
//! Nothing here has behaviour beyond accessors and value semantics: everything is
//! `Clone`, and cloning is a deep copy of the metadata (processor lists are new
//! vectors; the processor functions themselves are shared, immutable `Arc`s).
//! Inheritance relies on that.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::error::ServiceError;
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

/// A business-object instance handed to a service handler.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

// ── ServiceType ───────────────────────────────────────────────────────────────

/// The identity of a service "class": a Rust type plus, when it can be built
/// without help, its constructor.
///
/// Equality and hashing look at the `TypeId` only.
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
    construct: Option<fn() -> ServiceInstance>,
}

impl ServiceType {
    /// A service type the default factory can instantiate with `S::default()`.
    pub fn of<S: Default + Send + Sync + 'static>() -> Self {
        Self { id: TypeId::of::<S>(), name: std::any::type_name::<S>(), construct: Some(construct::<S>) }
    }

    /// A type with no constructor: abstract bases, proxies, marker types.
    pub fn abstract_of<S: ?Sized + 'static>() -> Self {
        Self { id: TypeId::of::<S>(), name: std::any::type_name::<S>(), construct: None }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn is<S: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<S>()
    }

    /// A fresh instance, for types registered with [`ServiceType::of`].
    pub fn construct(&self) -> Option<ServiceInstance> {
        self.construct.map(|f| f())
    }

    pub fn is_constructible(&self) -> bool { self.construct.is_some() }
}

fn construct<S: Default + Send + Sync + 'static>() -> ServiceInstance {
    Arc::new(S::default())
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state) }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ── Processors ────────────────────────────────────────────────────────────────

type PreFn = dyn Fn(&mut Request) -> Result<(), ServiceError> + Send + Sync;
type PostFn = dyn Fn(&Request, &mut Response) -> Result<(), ServiceError> + Send + Sync;

/// A transform applied to the request right before the service method runs.
#[derive(Clone)]
pub struct PreProcessor {
    name: &'static str,
    f: Arc<PreFn>,
    needs_cookies: bool,
}

impl PreProcessor {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&mut Request) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        Self { name, f: Arc::new(f), needs_cookies: false }
    }

    /// Marks the processor as reading cookies, which turns on cookie decoding.
    pub fn with_cookies(mut self) -> Self {
        self.needs_cookies = true;
        self
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn needs_cookies(&self) -> bool { self.needs_cookies }

    pub(crate) fn apply(&self, req: &mut Request) -> Result<(), ServiceError> {
        (self.f)(req)
    }

    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

/// A transform applied to the response after a successful service call.
#[derive(Clone)]
pub struct PostProcessor {
    name: &'static str,
    f: Arc<PostFn>,
    needs_cookies: bool,
}

impl PostProcessor {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&Request, &mut Response) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        Self { name, f: Arc::new(f), needs_cookies: false }
    }

    pub fn with_cookies(mut self) -> Self {
        self.needs_cookies = true;
        self
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn needs_cookies(&self) -> bool { self.needs_cookies }

    pub(crate) fn apply(&self, req: &Request, res: &mut Response) -> Result<(), ServiceError> {
        (self.f)(req, res)
    }

    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for PreProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreProcessor({})", self.name)
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PostProcessor({})", self.name)
    }
}

// ── Parameters ────────────────────────────────────────────────────────────────

/// Where a declared parameter's value comes from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParamKind {
    Path,
    Query,
    Header,
    Cookie,
    Form,
    Body,
    RawBody,
    Param,
    File,
    Files,
    Context,
    ContextRequest,
    ContextResponse,
    ContextNext,
    ContextAccept,
    ContextAcceptLanguage,
}

/// One declared method parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub type_name: String,
    pub kind: ParamKind,
}

impl ParamDescriptor {
    pub fn new(kind: ParamKind, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), kind }
    }
}

/// A multipart file field the method expects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileDescriptor {
    pub name: String,
    /// `true`: exactly one file (`maxCount = 1`); `false`: any number.
    pub single: bool,
}

/// Options for the body parser stages.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BodyOptions {
    /// Maximum body size in bytes.
    pub limit: Option<usize>,
    /// Media types the stage accepts; each parser has its own default.
    pub types: Option<Vec<String>>,
}

// ── MethodMetadata ────────────────────────────────────────────────────────────

/// Everything declared on one service method.
#[derive(Clone, Default)]
pub struct MethodMetadata {
    pub(crate) name: String,
    pub(crate) http_method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) roles: IndexSet<String>,
    pub(crate) languages: IndexSet<String>,
    pub(crate) accepts: IndexSet<String>,
    pub(crate) pre_processors: Vec<PreProcessor>,
    pub(crate) post_processors: Vec<PostProcessor>,
    pub(crate) body_options: Option<BodyOptions>,
    pub(crate) ignore_next_middlewares: bool,
    pub(crate) parameters: Vec<ParamDescriptor>,
    pub(crate) files: Vec<FileDescriptor>,
    pub(crate) must_parse_cookies: bool,
    pub(crate) must_parse_body: bool,
    pub(crate) must_parse_raw_body: bool,
    pub(crate) must_parse_forms: bool,
    pub(crate) accept_multi_typed_param: bool,
    pub(crate) handler: Option<BoxedHandler>,
    pub(crate) owner: Option<ServiceType>,
    pub(crate) resolved_path: Option<String>,
    pub(crate) resolved_languages: IndexSet<String>,
    pub(crate) resolved_accepts: IndexSet<String>,
}

impl MethodMetadata {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.to_owned(), ..Self::default() }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn http_method(&self) -> Option<Method> { self.http_method }
    pub fn path(&self) -> Option<&str> { self.path.as_deref() }
    pub fn roles(&self) -> &IndexSet<String> { &self.roles }
    pub fn languages(&self) -> &IndexSet<String> { &self.languages }
    pub fn accepts(&self) -> &IndexSet<String> { &self.accepts }
    pub fn pre_processors(&self) -> &[PreProcessor] { &self.pre_processors }
    pub fn post_processors(&self) -> &[PostProcessor] { &self.post_processors }
    pub fn body_options(&self) -> Option<&BodyOptions> { self.body_options.as_ref() }
    pub fn ignores_next_middlewares(&self) -> bool { self.ignore_next_middlewares }
    pub fn parameters(&self) -> &[ParamDescriptor] { &self.parameters }
    pub fn files(&self) -> &[FileDescriptor] { &self.files }
    pub fn accepts_multi_typed_param(&self) -> bool { self.accept_multi_typed_param }

    /// The service type the handler takes. It stays with the method when a
    /// subtype inherits it, so inherited routes run on an instance of this type.
    pub fn owner(&self) -> Option<ServiceType> { self.owner }

    /// The final route path; `None` until paths have been resolved.
    pub fn resolved_path(&self) -> Option<&str> { self.resolved_path.as_deref() }
    pub fn resolved_languages(&self) -> &IndexSet<String> { &self.resolved_languages }
    pub fn resolved_accepts(&self) -> &IndexSet<String> { &self.resolved_accepts }

    pub(crate) fn clear_resolved(&mut self) {
        self.resolved_path = None;
        self.resolved_languages.clear();
        self.resolved_accepts.clear();
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("name", &self.name)
            .field("http_method", &self.http_method)
            .field("path", &self.path)
            .field("resolved_path", &self.resolved_path)
            .field("roles", &self.roles)
            .field("pre_processors", &self.pre_processors)
            .field("post_processors", &self.post_processors)
            .field("parameters", &self.parameters)
            .field("files", &self.files)
            .field("has_handler", &self.handler.is_some())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

// ── ClassMetadata ─────────────────────────────────────────────────────────────

/// Everything declared on one service type, including its methods.
#[derive(Clone, Debug)]
pub struct ClassMetadata {
    pub(crate) target: ServiceType,
    pub(crate) parent: Option<ServiceType>,
    pub(crate) is_abstract: bool,
    pub(crate) path: Option<String>,
    pub(crate) roles: IndexSet<String>,
    pub(crate) languages: IndexSet<String>,
    pub(crate) accepts: IndexSet<String>,
    pub(crate) pre_processors: Vec<PreProcessor>,
    pub(crate) post_processors: Vec<PostProcessor>,
    pub(crate) body_options: Option<BodyOptions>,
    pub(crate) ignore_next_middlewares: bool,
    pub(crate) methods: IndexMap<String, MethodMetadata>,
    pub(crate) properties: IndexMap<String, serde_json::Value>,
}

impl ClassMetadata {
    pub(crate) fn new(target: ServiceType, parent: Option<ServiceType>) -> Self {
        Self {
            target,
            parent,
            is_abstract: false,
            path: None,
            roles: IndexSet::new(),
            languages: IndexSet::new(),
            accepts: IndexSet::new(),
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
            body_options: None,
            ignore_next_middlewares: false,
            methods: IndexMap::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn target(&self) -> ServiceType { self.target }
    pub fn parent(&self) -> Option<ServiceType> { self.parent }
    pub fn is_abstract(&self) -> bool { self.is_abstract }
    pub fn path(&self) -> Option<&str> { self.path.as_deref() }
    pub fn roles(&self) -> &IndexSet<String> { &self.roles }
    pub fn languages(&self) -> &IndexSet<String> { &self.languages }
    pub fn accepts(&self) -> &IndexSet<String> { &self.accepts }
    pub fn pre_processors(&self) -> &[PreProcessor] { &self.pre_processors }
    pub fn post_processors(&self) -> &[PostProcessor] { &self.post_processors }
    pub fn body_options(&self) -> Option<&BodyOptions> { self.body_options.as_ref() }
    pub fn ignores_next_middlewares(&self) -> bool { self.ignore_next_middlewares }

    pub fn method(&self, name: &str) -> Option<&MethodMetadata> { self.methods.get(name) }
    pub fn methods(&self) -> impl Iterator<Item = &MethodMetadata> { self.methods.values() }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> { self.properties.get(key) }
    pub fn has_properties(&self) -> bool { !self.properties.is_empty() }

    /// Mutable access to one method's metadata, e.g. to adjust an inherited copy.
    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodMetadata> {
        self.methods.get_mut(name)
    }
}
