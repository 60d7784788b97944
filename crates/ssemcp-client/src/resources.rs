//! Scoped resource tracking.
//!
//! A [`ResourceStack`] records nested acquisitions (a connection, then the
//! session built on top of it) and releases them in reverse order. Release is
//! best-effort: a failing release is reported and the remaining resources are
//! still released.
//!
//! The stack also covers the paths where nobody calls
//! [`release_all`](ResourceStack::release_all): when a stack is dropped while
//! still holding resources (an abandoned future, a panic unwinding through an
//! `init`), the remaining entries are released on the current tokio runtime.

use async_trait::async_trait;

use crate::error::{McpError, Result};

/// Something that must be released once the scope that acquired it ends.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Short label used in logs and cleanup errors (e.g. `"sse connection"`).
    fn label(&self) -> &str;

    /// Release the resource.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Reverse-order release stack for nested acquisitions.
#[derive(Default)]
pub struct ResourceStack {
    entries: Vec<Box<dyn Resource>>,
}

impl ResourceStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Track a freshly acquired resource.
    pub fn push(&mut self, resource: Box<dyn Resource>) {
        tracing::trace!(resource = %resource.label(), depth = self.entries.len() + 1, "acquired");
        self.entries.push(resource);
    }

    /// Number of resources currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of held resources, in acquisition order.
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.label().to_string()).collect()
    }

    /// Move every entry of `other` on top of this stack, keeping their order.
    pub fn absorb(&mut self, mut other: ResourceStack) {
        self.entries.append(&mut other.entries);
    }

    /// Release everything, newest first.
    ///
    /// Never stops early. Each failed release is logged and returned as an
    /// [`McpError::Cleanup`]; an empty vector means every release succeeded.
    /// Calling this on an empty stack is a no-op.
    ///
    /// Entries are popped one at a time, so if this future is dropped midway
    /// the ones not reached yet stay on the stack and its `Drop` releases them.
    pub async fn release_all(&mut self) -> Vec<McpError> {
        let mut failures = Vec::new();
        while let Some(resource) = self.entries.pop() {
            failures.extend(release_one(resource).await);
        }
        failures
    }
}

async fn release_one(resource: Box<dyn Resource>) -> Option<McpError> {
    let label = resource.label().to_string();
    match resource.release().await {
        Ok(()) => {
            tracing::trace!(resource = %label, "released");
            None
        }
        Err(e) => {
            tracing::warn!(resource = %label, error = %e, "failed to release resource");
            Some(match e {
                cleanup @ McpError::Cleanup { .. } => cleanup,
                other => McpError::cleanup(label, other),
            })
        }
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(
                    count = entries.len(),
                    "resource stack dropped while holding resources, releasing in background"
                );
                handle.spawn(async move {
                    let mut entries = entries;
                    while let Some(resource) = entries.pop() {
                        release_one(resource).await;
                    }
                });
            }
            Err(_) => {
                // No runtime left to drive async release; entries fall back to their own Drop.
                tracing::debug!(count = entries.len(), "dropping held resources without a runtime");
            }
        }
    }
}

impl std::fmt::Debug for ResourceStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStack")
            .field("entries", &self.labels())
            .finish()
    }
}
