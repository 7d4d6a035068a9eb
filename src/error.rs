//! Error types.
//!
//! Two families, matching the two phases of a service's life:
//!
//! - [`BuildError`]: raised while metadata is registered, resolved and bound.
//!   Every variant is fatal: the process should not start serving.
//! - [`ServiceError`]: raised while a request walks its pipeline. It stops that
//!   request only and is handed to the router's [`ErrorHandler`](crate::ErrorHandler).

use http::StatusCode;
use thiserror::Error;

/// Result alias for registration and build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// A failure detected before any traffic is served.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An annotation was applied with arguments or to a target it does not accept.
    #[error("Invalid @{annotation} declaration: {reason}")]
    InvalidDeclaration {
        annotation: &'static str,
        reason: String,
    },

    /// Two methods resolved to the same path and verb.
    #[error("Duplicated declaration for path [{path}], method [{method}].")]
    DuplicateRoute { path: String, method: String },

    /// The verb cannot be bound on the router.
    #[error("Invalid http method [{method}] for service [{path}]")]
    UnsupportedMethod { path: String, method: String },

    /// The router refused the path itself (bad syntax, overlapping wildcards).
    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    /// A service module failed while loading; wraps the module names for diagnostics.
    #[error("Error loading services for pattern: {patterns}. Error: {source}")]
    LoadServices {
        patterns: String,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    pub(crate) fn invalid(annotation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidDeclaration { annotation, reason: reason.into() }
    }
}

/// A typed request-time failure.
///
/// This layer never formats these into bodies itself; the router's error handler
/// decides what the client sees.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unauthorized")]
    Unauthorized,

    /// The caller is authenticated but holds none of the route's roles.
    #[error("Forbidden")]
    Forbidden,

    #[error("Not Found")]
    NotFound,

    /// The path exists but not for this verb. The `Allow` header is already set.
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("request entity too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Any other status a collaborator wants to surface.
    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The HTTP status that best describes this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized       => StatusCode::UNAUTHORIZED,
            Self::Forbidden          => StatusCode::FORBIDDEN,
            Self::NotFound           => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed   => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_)      => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Http { status, .. } => *status,
            Self::Internal(_)        => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
