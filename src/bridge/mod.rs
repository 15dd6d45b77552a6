//! Bridge entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Owns both transport roles and their lifecycle |
//! | [`BridgeBuilder`] | Fluent bridge configuration |
//! | [`TransportConfig`] | Immutable transport settings |
//! | [`TransportConfigBuilder`] | Validated settings builder |

// ============================================================================
// Submodules
// ============================================================================

/// Builders for settings and the bridge.
pub mod builder;

/// Bridge and lifecycle manager.
pub mod core;

/// Transport settings.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{BridgeBuilder, MAX_TIMEOUT, TransportConfigBuilder};
pub use core::Bridge;
pub use options::TransportConfig;
