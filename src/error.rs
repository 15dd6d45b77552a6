//! Error types for the MCP WebSocket bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use mcp_ws_bridge::{Error, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     let response = bridge.external().send_request(request).await?;
//!     println!("{}", response.result);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`], [`Error::AlreadyConnected`] |
//! | Correlation | [`Error::RequestTimeout`], [`Error::DuplicateId`], [`Error::TooManyPending`] |
//! | Protocol | [`Error::Parse`], [`Error::MethodNotFound`], [`Error::Internal`], [`Error::Rpc`] |
//! | Sessions | [`Error::SessionNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::ParseError as UrlError;

use crate::identifiers::SessionId;
use crate::protocol::{ErrorCode, ErrorObject, RequestId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Protocol-level variants ([`Error::Parse`], [`Error::MethodNotFound`],
/// [`Error::Internal`]) are converted into wire Error frames by the
/// session loop. Everything else is reported to the calling code.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when transport configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the outbound handshake fails or a frame cannot be written.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Handshake did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while a request was outstanding.
    ///
    /// Delivered to every pending request when the external connection
    /// drops or is intentionally closed.
    #[error("Connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection went away.
        reason: String,
    },

    /// No external connection is live.
    #[error("Not connected to external peer")]
    NotConnected,

    /// An external connection is already live.
    #[error("Already connected to external peer")]
    AlreadyConnected,

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// Request timeout.
    ///
    /// Returned when no matching response arrives within the deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Request ID already has a pending waiter.
    #[error("Duplicate request id: {request_id}")]
    DuplicateId {
        /// The colliding request ID.
        request_id: RequestId,
    },

    /// Too many outstanding requests.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently waiting.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed JSON-RPC frame.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of what was wrong with the frame.
        message: String,
    },

    /// Unknown method name.
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// The unrecognized method.
        method: String,
    },

    /// Unexpected failure while dispatching.
    #[error("Internal error: {message}")]
    Internal {
        /// Best-effort description.
        message: String,
    },

    /// Remote peer answered with a JSON-RPC Error frame.
    #[error("Remote error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional structured data.
        data: Option<Value>,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Session not found in the registry.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session.
        session_id: SessionId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] UrlError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a duplicate id error.
    #[inline]
    pub fn duplicate_id(request_id: RequestId) -> Self {
        Self::DuplicateId { request_id }
    }

    /// Creates a parse error.
    #[inline]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a method not found error.
    #[inline]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Creates an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }
}

impl From<ErrorObject> for Error {
    fn from(error: ErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::NotConnected
                | Self::AlreadyConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is answered over the wire
    /// rather than surfaced to the caller.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::MethodNotFound { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry or after reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::NotConnected
                | Self::TooManyPending { .. }
        )
    }
}

// ============================================================================
// Wire Conversion
// ============================================================================

impl Error {
    /// Converts this error into a JSON-RPC error object.
    ///
    /// Parse and method-not-found keep their dedicated codes; every other
    /// variant becomes an internal error carrying its display text.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::Parse { message } => ErrorObject::new(
                ErrorCode::ParseError,
                Some(json!({ "validation_error": message })),
            ),
            Self::MethodNotFound { method } => ErrorObject::new(
                ErrorCode::MethodNotFound,
                Some(json!({ "method": method })),
            ),
            Self::Rpc {
                code,
                message,
                data,
            } => ErrorObject {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => ErrorObject::new(
                ErrorCode::InternalError,
                Some(json!({ "error": other.to_string() })),
            ),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
