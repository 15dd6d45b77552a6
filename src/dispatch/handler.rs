//! Protocol handler seam.
//!
//! The transport never owns tool/resource business logic. A host injects an
//! [`McpHandler`] and the dispatcher queries it for the capability set it
//! currently exposes.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::protocol::{Prompt, Resource, ServerInfo, Tool};

// ============================================================================
// McpHandler
// ============================================================================

/// Capability source consulted by the dispatcher.
///
/// Only [`McpHandler::list_tools`] is required; resources and prompts
/// default to empty lists.
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// Identity reported in the `initialize` result.
    fn server_info(&self) -> ServerInfo {
        ServerInfo::default()
    }

    /// Returns the currently registered tools.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Returns the currently registered resources.
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }

    /// Returns the currently registered prompts.
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// In-memory [`McpHandler`] whose tool set can change at runtime.
///
/// Tools are listed in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    info: ServerInfo,
    tools: RwLock<Vec<Tool>>,
    index: RwLock<FxHashMap<String, usize>>,
}

impl ToolRegistry {
    /// Creates an empty registry reporting the default server identity.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry reporting `info`.
    #[inline]
    #[must_use]
    pub fn with_server_info(info: ServerInfo) -> Self {
        Self {
            info,
            ..Self::default()
        }
    }

    /// Registers a tool, replacing any tool with the same name.
    pub fn register(&self, tool: Tool) {
        let mut tools = self.tools.write();
        let mut index = self.index.write();
        match index.get(&tool.name) {
            Some(&pos) => tools[pos] = tool,
            None => {
                index.insert(tool.name.clone(), tools.len());
                tools.push(tool);
            }
        }
    }

    /// Removes a tool by name. Returns `true` if it was registered.
    pub fn remove(&self, name: &str) -> bool {
        let mut tools = self.tools.write();
        let mut index = self.index.write();
        let Some(pos) = index.remove(name) else {
            return false;
        };
        tools.remove(pos);
        for slot in index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        true
    }

    /// Returns the number of registered tools.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Returns `true` if no tools are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[async_trait]
impl McpHandler for ToolRegistry {
    fn server_info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.tools.read().clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
