//! Protocol dispatch.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dispatcher` | Method table and error mapping |
//! | `handler` | Injected handler trait and in-memory implementation |

// ============================================================================
// Submodules
// ============================================================================

/// Method table and error mapping.
pub mod dispatcher;

/// Injected handler trait.
pub mod handler;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::Dispatcher;
pub use handler::{McpHandler, ToolRegistry};
