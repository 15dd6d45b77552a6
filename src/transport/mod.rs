//! WebSocket transport layer.
//!
//! Carries JSON-RPC frames in both directions: inbound sessions opened by
//! remote clients, and one outbound connection to an external server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ws://host{mount}   ┌──────────────────────────┐   ws(s)://peer   ┌──────────────┐
//! │  MCP client  │─────────────────────►│ InboundServer            │                  │              │
//! │  MCP client  │─────────────────────►│  → SessionRegistry       │                  │  External    │
//! └──────────────┘                      │      → Dispatcher        │                  │  MCP server  │
//!                                       │ ExternalConnector ───────┼─────────────────►│              │
//!                                       │  → RequestCorrelator     │◄─────────────────┤              │
//!                                       └──────────────────────────┘                  └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | Pending request table |
//! | `external` | Outbound connection and its receive loop |
//! | `keepalive` | Ping/pong liveness |
//! | `observer` | Lifecycle event subscribers |
//! | `server` | TCP accept loop with mount-path check |
//! | `session` | Inbound session registry |

// ============================================================================
// Submodules
// ============================================================================

/// Pending request table.
pub mod correlator;

/// Outbound connection to an external MCP server.
pub mod external;

mod keepalive;

/// Lifecycle event subscribers.
pub mod observer;

/// TCP accept loop.
pub mod server;

/// Inbound session registry.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::{RequestCorrelator, Waiter};
pub use external::{ConnectionState, ExternalConnector};
pub use observer::{Observers, TransportEvent, TransportObserver};
pub use server::InboundServer;
pub use session::{SessionRegistry, SessionState};
