//! JSON-RPC / MCP protocol message types.
//!
//! This module defines the wire format shared by both roles of the
//! transport: inbound sessions and the outbound external connection.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | both | Call expecting a reply |
//! | `Response` | both | Successful reply, matched by `id` |
//! | `ErrorResponse` | both | Failed reply, `id` may be `null` |
//! | `Notification` | both | One-way message, never answered |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | JSON-RPC envelope types and codec |
//! | `mcp` | MCP handshake and introspection payloads |

// ============================================================================
// Submodules
// ============================================================================

/// MCP handshake and introspection payloads.
pub mod mcp;

/// JSON-RPC message types and codec.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use mcp::{
    InitializeResult, PROTOCOL_VERSION, Prompt, PromptArgument, Resource, ServerCapabilities,
    ServerInfo, Tool, methods,
};
pub use message::{
    ErrorCode, ErrorObject, ErrorResponse, JSONRPC_VERSION, Message, Notification, Request,
    RequestId, Response,
};
