//! MCP WebSocket Bridge - dual-role JSON-RPC transport.
//!
//! This library carries JSON-RPC 2.0 (as used by the Model Context
//! Protocol) over persistent WebSocket connections in two roles at once.
//!
//! # Architecture
//!
//! - **Server role**: remote clients connect to the mount path; each
//!   connection becomes a session whose requests are dispatched into an
//!   injected [`McpHandler`].
//! - **Client role**: one outbound connection to an external MCP server;
//!   requests sent over it are matched to their replies by id.
//!
//! Key design principles:
//!
//! - One [`Bridge`] value owns the whole transport; no global state
//! - One task per inbound session, one for the external connection
//! - Protocol errors become wire Error frames and never end a session
//! - Shutdown fails every outstanding request instead of leaving it hanging
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_ws_bridge::{Bridge, Request, Result, Tool, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let tools = Arc::new(ToolRegistry::new());
//!     tools.register(Tool::new("list_alarms", "List all alarms"));
//!
//!     let bridge = Bridge::builder()
//!         .handler(tools)
//!         .external_url("ws://127.0.0.1:9000/ws")
//!         .build()?;
//!
//!     let addr = bridge.start().await?;
//!     println!("clients connect to ws://{addr}/ws");
//!
//!     let reply = bridge.send_request(Request::new("tools/list", None)).await?;
//!     println!("external tools: {}", reply.result);
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`], builders and [`TransportConfig`] |
//! | [`dispatch`] | Method table and the [`McpHandler`] trait |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | JSON-RPC messages and MCP payloads |
//! | [`transport`] | Sessions, external connection, correlation |

// ============================================================================
// Modules
// ============================================================================

/// Bridge entry point and configuration.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Protocol dispatch into an injected handler.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// JSON-RPC message types and MCP payloads.
pub mod protocol;

/// WebSocket transport layer.
///
/// Inbound session registry, outbound connector and request correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, TransportConfig, TransportConfigBuilder};

// Dispatch types
pub use dispatch::{Dispatcher, McpHandler, ToolRegistry};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{SessionId, SubscriptionId};

// Protocol types
pub use protocol::{
    ErrorCode, ErrorObject, ErrorResponse, InitializeResult, Message, Notification, Prompt,
    Request, RequestId, Resource, Response, ServerInfo, Tool,
};

// Transport types
pub use transport::{
    ConnectionState, ExternalConnector, SessionRegistry, SessionState, TransportEvent,
    TransportObserver,
};
