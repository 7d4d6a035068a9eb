//! The router services are bound onto.
//!
//! [`RouteTarget`] is the registration surface the container needs: one
//! per-verb primitive and one catch-all. [`Router`] is the bundled
//! implementation: one radix tree over paths ([`matchit`]), and per path the
//! layers registered there, run in registration order like an express router.
//!
//! Paths use express syntax (`/people/:id`); they are translated to matchit's
//! `{id}` form on insertion.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::error::{BuildError, ServiceError};
use crate::method::Method;
use crate::middleware::{BoxedMiddleware, Exchange, Flow, Pipeline};
use crate::request::Request;
use crate::response::Response;

/// Where the container binds routes.
///
/// Implementations must reject a second registration of the same `(path, method)`
/// with [`BuildError::DuplicateRoute`]; the container relies on that to refuse a
/// repeated build against one router.
pub trait RouteTarget {
    /// Registers `pipeline` for requests with `method` on `path`.
    fn on(&mut self, method: Method, path: &str, pipeline: Pipeline) -> Result<(), BuildError>;

    /// Registers `middleware` for every request on `path`, whatever the verb.
    fn all(&mut self, path: &str, middleware: BoxedMiddleware) -> Result<(), BuildError>;
}

// ── Error handler ─────────────────────────────────────────────────────────────

/// The one place request-time failures turn into responses.
///
/// `response` is the response as the failing pipeline left it, so headers set
/// before the failure (such as `Allow`) are still there.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request, error: ServiceError, response: Response) -> Response;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Request, ServiceError, Response) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request, error: ServiceError, response: Response) -> Response {
        self(request, error, response)
    }
}

/// Status from [`ServiceError::status`], error text as the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, _request: &Request, error: ServiceError, mut response: Response) -> Response {
        response.set_status(error.status());
        response.set_header("content-type", "text/plain; charset=utf-8");
        response.set_body(error.to_string());
        response
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

enum Layer {
    Route { method: Method, pipeline: Pipeline },
    All(Pipeline),
}

#[derive(Default)]
struct PathEntry {
    layers: Vec<Layer>,
}

impl PathEntry {
    fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.layers.iter().filter_map(|layer| match layer {
            Layer::Route { method, .. } => Some(*method),
            Layer::All(_) => None,
        })
    }
}

/// The application router.
///
/// Build it once at startup, let the container bind services onto it, then
/// hand it to [`Server::serve`](crate::Server::serve) (or call
/// [`Router::handle`] directly).
pub struct Router {
    tree: MatchitRouter<usize>,
    entries: Vec<PathEntry>,
    index: HashMap<String, usize>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            tree: MatchitRouter::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            error_handler: Arc::new(DefaultErrorHandler),
        }
    }

    /// Replaces the centralized failure handler.
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Verbs registered on `path` (as written at registration), in order.
    pub fn methods_at(&self, path: &str) -> Vec<Method> {
        self.index.get(route_key(path)).map(|&i| self.entries[i].methods().collect()).unwrap_or_default()
    }

    /// Number of catch-all layers registered on `path`.
    pub fn fallbacks_at(&self, path: &str) -> usize {
        self.index.get(route_key(path)).map_or(0, |&i| {
            self.entries[i].layers.iter().filter(|l| matches!(l, Layer::All(_))).count()
        })
    }

    fn entry_mut(&mut self, path: &str) -> Result<&mut PathEntry, BuildError> {
        let path = route_key(path);
        let i = match self.index.get(path) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.tree
                    .insert(to_matchit(path), i)
                    .map_err(|e| BuildError::InvalidRoute { path: path.to_owned(), reason: e.to_string() })?;
                self.entries.push(PathEntry::default());
                self.index.insert(path.to_owned(), i);
                i
            }
        };
        Ok(&mut self.entries[i])
    }

    fn lookup(&self, path: &str) -> Option<(&PathEntry, HashMap<String, String>)> {
        let matched = self.tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((&self.entries[*matched.value], params))
    }

    /// Routes one request and produces one response. Never fails: every
    /// [`ServiceError`] goes through the error handler.
    pub async fn handle(&self, mut request: Request) -> Response {
        let Some((entry, params)) = self.lookup(request.path()) else {
            return self.error_handler.handle(&request, ServiceError::NotFound, Response::default());
        };
        request.params = params;

        let mut exchange = Exchange::new(request);
        match run_layers(entry, &mut exchange).await {
            Ok(()) if exchange.response.is_sent() => exchange.response,
            Ok(()) => self.error_handler.handle(&exchange.request, ServiceError::NotFound, exchange.response),
            Err(err) => {
                debug!(
                    method = %exchange.request.method(),
                    path = %exchange.request.path(),
                    error = %err,
                    "request failed",
                );
                self.error_handler.handle(&exchange.request, err, exchange.response)
            }
        }
    }
}

/// Route layers run when their verb matches. A `HEAD` request on a path with no
/// `HEAD` route is served by its `GET` routes.
async fn run_layers(entry: &PathEntry, exchange: &mut Exchange) -> Result<(), ServiceError> {
    let head_via_get =
        exchange.request.method() == http::Method::HEAD && !entry.methods().any(|m| m == Method::Head);
    for layer in &entry.layers {
        let pipeline = match layer {
            Layer::Route { method, pipeline } if method.matches(exchange.request.method()) => pipeline,
            Layer::Route { method: Method::Get, pipeline } if head_via_get => pipeline,
            Layer::Route { .. } => continue,
            Layer::All(pipeline) => pipeline,
        };
        if pipeline.run(exchange).await? == Flow::Halt {
            break;
        }
    }
    Ok(())
}

impl RouteTarget for Router {
    fn on(&mut self, method: Method, path: &str, pipeline: Pipeline) -> Result<(), BuildError> {
        let entry = self.entry_mut(path)?;
        if entry.methods().any(|m| m == method) {
            return Err(BuildError::DuplicateRoute { path: path.to_owned(), method: method.to_string() });
        }
        entry.layers.push(Layer::Route { method, pipeline });
        Ok(())
    }

    fn all(&mut self, path: &str, middleware: BoxedMiddleware) -> Result<(), BuildError> {
        self.entry_mut(path)?.layers.push(Layer::All(Pipeline::single(middleware)));
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// An empty route path is the root.
fn route_key(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

/// `/people/:id` → `/people/{id}`; literal braces are escaped.
fn to_matchit(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) if !name.is_empty() => format!("{{{name}}}"),
            _ => segment.replace('{', "{{").replace('}', "}}"),
        })
        .collect::<Vec<_>>()
        .join("/")
}
