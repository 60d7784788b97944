//! Client-side request/response interceptors.
//!
//! Middlewares are attached to a session, not to the client: a session that
//! exposes a [`MiddlewareHost`] runs them around every request it sends.
//! Sessions without that extension point simply skip them, with a warning.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::session::Session;

/// Intercepts requests before they are sent and responses once they arrive.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Adjust an outgoing request (add `_meta`, tag params, ...).
    fn on_request(&self, _request: &mut JsonRpcRequest) {}

    /// Inspect or adjust the response to `method`.
    fn on_response(&self, _method: &str, _response: &mut JsonRpcResponse) {}
}

impl fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Middleware({})", self.name())
    }
}

/// Extension point of sessions that accept middlewares.
pub trait MiddlewareHost: Send + Sync {
    /// Append a middleware to the session's chain.
    fn add_middleware(&self, middleware: Arc<dyn Middleware>);
}

/// Ordered middleware list, applied front to back.
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Number of middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Middleware names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run every `on_request` hook in order.
    pub fn apply_request(&self, request: &mut JsonRpcRequest) {
        for middleware in &self.middlewares {
            middleware.on_request(request);
        }
    }

    /// Run every `on_response` hook in order.
    pub fn apply_response(&self, method: &str, response: &mut JsonRpcResponse) {
        for middleware in &self.middlewares {
            middleware.on_response(method, response);
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Attach `middlewares` to `session` in order.
///
/// Returns how many were attached. A session without a [`MiddlewareHost`]
/// gets none, and each skipped middleware is logged as a warning.
pub fn attach_middlewares(
    session: &dyn Session,
    middlewares: &[Arc<dyn Middleware>],
    server: &str,
) -> usize {
    match session.middleware_host() {
        Some(host) => {
            for middleware in middlewares {
                tracing::debug!(server = %server, middleware = %middleware.name(), "attaching middleware");
                host.add_middleware(middleware.clone());
            }
            middlewares.len()
        }
        None => {
            for middleware in middlewares {
                tracing::warn!(
                    server = %server,
                    middleware = %middleware.name(),
                    "session does not support middlewares, middleware ignored"
                );
            }
            0
        }
    }
}
