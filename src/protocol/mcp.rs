//! MCP payload shapes carried inside JSON-RPC results.
//!
//! Only the handshake and introspection results are modeled here; tool
//! execution belongs to the injected handler.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version returned by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names understood by the dispatcher.
pub mod methods {
    /// Handshake.
    pub const INITIALIZE: &str = "initialize";
    /// Liveness check.
    pub const PING: &str = "ping";
    /// Tool introspection.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Resource introspection.
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Prompt introspection.
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Sent by clients once the handshake completes.
    pub const INITIALIZED: &str = "notifications/initialized";
}

// ============================================================================
// ServerInfo
// ============================================================================

/// Identity reported in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl ServerInfo {
    /// Creates server info.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

// ============================================================================
// InitializeResult
// ============================================================================

/// Capability descriptor advertised during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capability options.
    pub tools: Map<String, Value>,
    /// Resource capability options.
    pub resources: Map<String, Value>,
    /// Prompt capability options.
    pub prompts: Map<String, Value>,
}

/// Result of the `initialize` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Always [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// Advertised capabilities.
    pub capabilities: ServerCapabilities,
    /// Server identity.
    pub server_info: ServerInfo,
}

impl InitializeResult {
    /// Builds the fixed handshake reply for `server_info`.
    #[must_use]
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info,
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// A tool exposed by the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema of the tool arguments.
    pub input_schema: Value,
}

impl Tool {
    /// Creates a tool that takes an empty object.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    /// Replaces the input schema.
    #[inline]
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A resource exposed by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// An argument accepted by a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A prompt template exposed by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

// ============================================================================
// Tests
// ============================================================================
