//! Registry of discovered tools.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::ToolInfo;

/// Tools from the most recent successful discovery.
///
/// Discovery swaps the whole list at once; readers hold an [`Arc`] snapshot
/// and never see a half-updated registry.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<Arc<Vec<ToolInfo>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents.
    pub fn replace(&self, tools: Vec<ToolInfo>) {
        *self.tools.write() = Arc::new(tools);
    }

    /// Current tool list.
    pub fn snapshot(&self) -> Arc<Vec<ToolInfo>> {
        self.tools.read().clone()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<ToolInfo> {
        self.tools.read().iter().find(|t| t.name == name).cloned()
    }

    /// Tool names, in server order.
    pub fn names(&self) -> Vec<String> {
        self.tools.read().iter().map(|t| t.name.clone()).collect()
    }

    /// Number of known tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether no tools are known.
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
