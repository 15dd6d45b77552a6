//! Protocol dispatcher.
//!
//! Turns a decoded [`Request`] into a [`Response`] or [`ErrorResponse`] by
//! consulting the injected [`McpHandler`].
//!
//! # Method Table
//!
//! | Method | Result |
//! |--------|--------|
//! | `initialize` | fixed protocol version, capabilities, server info |
//! | `ping` | `{}` |
//! | `tools/list` | `{"tools": [...]}` |
//! | `resources/list` | `{"resources": [...]}` |
//! | `prompts/list` | `{"prompts": [...]}` |
//! | anything else | `-32601` with `data.method` |
//!
//! Handler calls are bounded by the configured handler timeout; a handler
//! failure or timeout becomes a `-32603` error, never a panic.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    ErrorResponse, InitializeResult, Message, Request, Response, methods,
};
use crate::transport::observer::{Observers, TransportEvent};

use super::handler::McpHandler;

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes JSON-RPC requests into an [`McpHandler`].
///
/// Cheap to share: wrap in `Arc` and hand to every session.
pub struct Dispatcher {
    /// Injected protocol handler.
    handler: Arc<dyn McpHandler>,
    /// Upper bound on any single handler call.
    handler_timeout: Duration,
    /// Receives unsolicited external messages.
    observers: Arc<Observers>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        handler: Arc<dyn McpHandler>,
        handler_timeout: Duration,
        observers: Arc<Observers>,
    ) -> Self {
        Self {
            handler,
            handler_timeout,
            observers,
        }
    }

    /// Resolves one request into its reply frame.
    ///
    /// Always returns either [`Message::Response`] or [`Message::Error`]
    /// with the request id preserved.
    pub async fn dispatch(&self, request: &Request) -> Message {
        match self.resolve(request).await {
            Ok(result) => Message::Response(Response::new(request.id.clone(), result)),
            Err(e) => {
                if matches!(e, Error::MethodNotFound { .. }) {
                    warn!(method = %request.method, "Unhandled MCP method");
                } else {
                    warn!(method = %request.method, error = %e, "Dispatch failed");
                }
                Message::Error(ErrorResponse::new(
                    Some(request.id.clone()),
                    internalize(e).to_error_object(),
                ))
            }
        }
    }

    /// Handles any inbound frame from a session.
    ///
    /// Requests produce a reply; notifications and stray replies do not.
    pub async fn handle(&self, message: Message) -> Option<Message> {
        match message {
            Message::Request(request) => Some(self.dispatch(&request).await),
            Message::Notification(notification) => {
                if notification.method == methods::INITIALIZED {
                    info!("Client initialized");
                } else {
                    debug!(method = %notification.method, "Notification received");
                }
                None
            }
            Message::Response(_) | Message::Error(_) => {
                debug!(id = ?message.id(), "Ignoring reply on inbound session");
                None
            }
        }
    }

    /// Handles a frame from the external peer that matched no pending
    /// request.
    ///
    /// There is no reply path back to the peer; the frame is logged and
    /// published to observers.
    pub fn handle_unsolicited(&self, message: Message) {
        info!(
            method = message.method().unwrap_or_default(),
            id = ?message.id(),
            "Received message from external server"
        );
        self.observers
            .emit(&TransportEvent::Unsolicited { message });
    }

    async fn resolve(&self, request: &Request) -> Result<Value> {
        match request.method.as_str() {
            methods::INITIALIZE => {
                to_result(&InitializeResult::new(self.handler.server_info()))
            }
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => {
                let tools = self.bounded(self.handler.list_tools()).await?;
                Ok(json!({ "tools": to_result(&tools)? }))
            }
            methods::RESOURCES_LIST => {
                let resources = self.bounded(self.handler.list_resources()).await?;
                Ok(json!({ "resources": to_result(&resources)? }))
            }
            methods::PROMPTS_LIST => {
                let prompts = self.bounded(self.handler.list_prompts()).await?;
                Ok(json!({ "prompts": to_result(&prompts)? }))
            }
            other => Err(Error::method_not_found(other)),
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.handler_timeout, call).await.map_err(|_| {
            Error::internal(format!(
                "handler did not respond within {}ms",
                self.handler_timeout.as_millis()
            ))
        })?
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Keeps parse/method-not-found codes; folds everything else into an
/// internal error.
fn internalize(e: Error) -> Error {
    if e.is_protocol_error() {
        e
    } else {
        Error::internal(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
