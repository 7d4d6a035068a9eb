//! Role-based access check.
//!
//! Runs right after the authenticator's own stage. The wildcard role `*` never
//! reaches this stage: a route secured only with `*` admits any authenticated
//! caller and gets no role check at all.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::debug;

use crate::error::ServiceError;
use crate::middleware::{BoxFuture, Exchange, Flow, Middleware};
use crate::service::Authenticator;

/// Lets the request through when the caller holds at least one declared role.
pub struct RoleCheck {
    roles: IndexSet<String>,
    authenticator: Arc<dyn Authenticator>,
}

impl RoleCheck {
    pub fn new(roles: IndexSet<String>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { roles, authenticator }
    }

    pub fn roles(&self) -> &IndexSet<String> { &self.roles }
}

impl Middleware for RoleCheck {
    fn name(&self) -> &'static str { "role-check" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            let held = self.authenticator.roles(&exchange.request);
            if held.iter().any(|role| self.roles.contains(role)) {
                Ok(Flow::Next)
            } else {
                debug!(path = %exchange.request.path(), required = ?self.roles, held = ?held, "caller lacks required role");
                Err(ServiceError::Forbidden)
            }
        })
    }
}
