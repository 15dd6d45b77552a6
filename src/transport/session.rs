//! Inbound session registry.
//!
//! Tracks every WebSocket connection opened by a remote client, keyed by
//! [`SessionId`]. Each session runs one receive loop task that decodes
//! frames, dispatches them and writes replies back in arrival order.
//!
//! # Failure Isolation
//!
//! - A frame that fails to decode is answered with a `-32700` Error frame;
//!   the session stays open.
//! - A socket failure or peer hang-up ends only that session.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::TransportConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{ErrorResponse, Message, Notification};

use super::keepalive::{Keepalive, KeepaliveAction};
use super::observer::{Observers, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Whether a session is still registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Receive loop running, socket open.
    Open,
    /// Never existed or already removed.
    Closed,
}

/// Internal commands for a session loop.
enum SessionCommand {
    /// Write an already-encoded frame.
    Send(String),
    /// Close the socket and stop.
    Close,
}

/// Registry entry for one session.
struct SessionHandle {
    /// Channel into the session loop.
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Receive loop task, set right after spawn.
    task: Option<JoinHandle<()>>,
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// Owns accept, receive loop and cleanup for inbound sessions.
///
/// # Thread Safety
///
/// The map is guarded by a lock that is never held across an await.
pub struct SessionRegistry {
    /// Open sessions.
    sessions: RwLock<FxHashMap<SessionId, SessionHandle>>,
    /// Resolves inbound requests.
    dispatcher: Arc<Dispatcher>,
    /// Lifecycle subscribers.
    observers: Arc<Observers>,
    /// Keepalive and close timing.
    config: Arc<TransportConfig>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionRegistry - Public API
// ============================================================================

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        observers: Arc<Observers>,
        config: Arc<TransportConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(FxHashMap::default()),
            dispatcher,
            observers,
            config,
        })
    }

    /// Registers an upgraded WebSocket and starts its receive loop.
    ///
    /// The returned id is unique among currently open sessions.
    pub fn accept<S>(self: &Arc<Self>, ws_stream: WebSocketStream<S>) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session_id = {
            let mut sessions = self.sessions.write();
            let mut session_id = SessionId::generate();
            while sessions.contains_key(&session_id) {
                session_id = SessionId::generate();
            }
            sessions.insert(
                session_id,
                SessionHandle {
                    command_tx,
                    task: None,
                },
            );
            session_id
        };

        info!(session_id = %session_id, "New WebSocket connection established");
        self.observers
            .emit(&TransportEvent::SessionOpened { session_id });

        let task = tokio::spawn(Arc::clone(self).receive_loop(session_id, ws_stream, command_rx));

        if let Some(handle) = self.sessions.write().get_mut(&session_id) {
            handle.task = Some(task);
        }

        session_id
    }

    /// Closes a session and waits for its loop to stop.
    ///
    /// Idempotent: returns `false` if the session was not open.
    pub async fn close(&self, session_id: SessionId) -> bool {
        let Some(handle) = self.remove(session_id) else {
            return false;
        };
        self.stop(session_id, handle).await;
        true
    }

    /// Closes every session, tolerating individual failures.
    ///
    /// Returns the number of sessions closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        let count = drained.len();

        for (session_id, handle) in drained {
            self.observers
                .emit(&TransportEvent::SessionClosed { session_id });
            self.stop(session_id, handle).await;
        }

        if count > 0 {
            info!(count, "Closed all inbound sessions");
        }
        count
    }

    /// Sends a notification to one client.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionNotFound`] if the session is not open
    /// - [`Error::Json`] if the notification cannot be encoded
    pub fn notify(&self, session_id: SessionId, notification: Notification) -> Result<()> {
        let frame = Message::Notification(notification).encode()?;
        let sessions = self.sessions.read();
        let handle = sessions
            .get(&session_id)
            .ok_or_else(|| Error::session_not_found(session_id))?;
        handle
            .command_tx
            .send(SessionCommand::Send(frame))
            .map_err(|_| Error::session_not_found(session_id))
    }

    /// Returns the number of open sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns the state of a session.
    #[must_use]
    pub fn session_state(&self, session_id: SessionId) -> SessionState {
        if self.sessions.read().contains_key(&session_id) {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Returns the ids of all open sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }
}

// ============================================================================
// SessionRegistry - Cleanup
// ============================================================================

impl SessionRegistry {
    /// Removes an entry and announces it. Whoever removes it announces it.
    fn remove(&self, session_id: SessionId) -> Option<SessionHandle> {
        let handle = self.sessions.write().remove(&session_id)?;
        self.observers
            .emit(&TransportEvent::SessionClosed { session_id });
        debug!(session_id = %session_id, "Session removed from registry");
        Some(handle)
    }

    /// Signals a removed session's loop and waits for it to finish.
    async fn stop(&self, session_id: SessionId, handle: SessionHandle) {
        let _ = handle.command_tx.send(SessionCommand::Close);

        let Some(mut task) = handle.task else {
            return;
        };
        // Close handshake plus a little slack for the loop to unwind.
        let grace = self.config.close_timeout + Duration::from_millis(100);
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(session_id = %session_id, error = %e, "Session task failed"),
            Err(_) => {
                warn!(session_id = %session_id, "Session did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

// ============================================================================
// SessionRegistry - Receive Loop
// ============================================================================

impl SessionRegistry {
    /// Runs until the peer disconnects, the socket fails or the session
    /// is closed locally.
    async fn receive_loop<S>(
        self: Arc<Self>,
        session_id: SessionId,
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut keepalive = Keepalive::new(self.config.ping_interval, self.config.ping_timeout);

        loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            keepalive.record_activity();
                            trace!(session_id = %session_id, text = %text.as_str(), "Frame received");

                            if let Some(reply) = self.handle_frame(session_id, &text).await
                                && let Err(e) = ws_write.send(WsMessage::Text(reply.into())).await
                            {
                                warn!(session_id = %session_id, error = %e, "Failed to send response");
                                break;
                            }
                        }

                        Some(Ok(WsMessage::Binary(_))) => {
                            keepalive.record_activity();
                            let reply = reject_frame(Error::parse("binary frames are not supported"));
                            if let Some(reply) = reply
                                && let Err(e) = ws_write.send(WsMessage::Text(reply.into())).await
                            {
                                warn!(session_id = %session_id, error = %e, "Failed to send response");
                                break;
                            }
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            info!(session_id = %session_id, "WebSocket client disconnected");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(session_id = %session_id, error = %e, "Error in WebSocket connection");
                            break;
                        }

                        None => {
                            debug!(session_id = %session_id, "WebSocket stream ended");
                            break;
                        }

                        // Ping, Pong, raw frames
                        Some(Ok(_)) => keepalive.record_activity(),
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Send(frame)) => {
                            if let Err(e) = ws_write.send(WsMessage::Text(frame.into())).await {
                                warn!(session_id = %session_id, error = %e, "Failed to send notification");
                                break;
                            }
                        }

                        Some(SessionCommand::Close) | None => {
                            self.close_socket(session_id, &mut ws_write).await;
                            break;
                        }
                    }
                }

                action = keepalive.tick() => {
                    match action {
                        KeepaliveAction::SendPing => {
                            if let Err(e) = ws_write.send(WsMessage::Ping(Vec::new().into())).await {
                                warn!(session_id = %session_id, error = %e, "Failed to send ping");
                                break;
                            }
                        }
                        KeepaliveAction::Wait => {}
                        KeepaliveAction::Expired => {
                            warn!(session_id = %session_id, "Keepalive timed out");
                            self.close_socket(session_id, &mut ws_write).await;
                            break;
                        }
                    }
                }
            }
        }

        // Transport-level exit: drop only this session.
        self.remove(session_id);
        info!(session_id = %session_id, "WebSocket connection closed");
    }

    /// Decodes, dispatches and encodes the reply for one text frame.
    async fn handle_frame(&self, session_id: SessionId, text: &str) -> Option<String> {
        match Message::decode(text) {
            Ok(message) => {
                let reply = self.dispatcher.handle(message).await?;
                match reply.encode() {
                    Ok(json) => Some(json),
                    Err(e) => {
                        error!(session_id = %session_id, error = %e, "Failed to encode reply");
                        reject_frame(Error::internal(e.to_string()))
                    }
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Invalid JSON-RPC message");
                reject_frame(e)
            }
        }
    }

    async fn close_socket<S>(
        &self,
        session_id: SessionId,
        ws_write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(self.config.close_timeout, ws_write.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %session_id, error = %e, "Close handshake failed"),
            Err(_) => debug!(session_id = %session_id, "Close handshake timed out"),
        }
    }
}

/// Encodes an Error frame with a null id for a frame that could not be read.
fn reject_frame(e: Error) -> Option<String> {
    Message::Error(ErrorResponse::new(None, e.to_error_object()))
        .encode()
        .ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};
    use tokio::io::{DuplexStream, duplex};
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::dispatch::ToolRegistry;

    type Client = WebSocketStream<DuplexStream>;

    fn registry() -> Arc<SessionRegistry> {
        let observers = Arc::new(Observers::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ToolRegistry::new()),
            Duration::from_secs(5),
            Arc::clone(&observers),
        ));
        let config = TransportConfig::builder()
            .close_timeout(Duration::from_millis(200))
            .build()
            .expect("config");
        SessionRegistry::new(dispatcher, observers, Arc::new(config))
    }

    async fn open(registry: &Arc<SessionRegistry>) -> (SessionId, Client) {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (registry.accept(server), client)
    }

    async fn call(client: &mut Client, frame: &str) -> Value {
        client
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .expect("send");
        loop {
            match client.next().await.expect("frame").expect("ok") {
                WsMessage::Text(text) => return serde_json::from_str(&text).expect("json"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_initialize_on_fresh_session() {
        let registry = registry();
        let (session_id, mut client) = open(&registry).await;
        assert_eq!(registry.session_state(session_id), SessionState::Open);

        let reply = call(
            &mut client,
            r#"{"jsonrpc":"2.0","id":"1","method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(reply["id"], "1");
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn test_unknown_method_keeps_id() {
        let registry = registry();
        let (_, mut client) = open(&registry).await;

        let reply = call(
            &mut client,
            r#"{"jsonrpc":"2.0","id":"2","method":"bogus/method","params":{}}"#,
        )
        .await;
        assert_eq!(reply["id"], "2");
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["data"]["method"], "bogus/method");
    }

    #[tokio::test]
    async fn test_parse_error_keeps_session_open() {
        let registry = registry();
        let (session_id, mut client) = open(&registry).await;

        let reply = call(&mut client, "{not json").await;
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], -32700);
        assert_eq!(registry.session_state(session_id), SessionState::Open);

        let reply = call(
            &mut client,
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
        )
        .await;
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn test_replies_follow_arrival_order() {
        let registry = registry();
        let (_, mut client) = open(&registry).await;

        for n in 0..5 {
            let frame = format!(r#"{{"jsonrpc":"2.0","id":{n},"method":"ping"}}"#);
            client
                .send(WsMessage::Text(frame.into()))
                .await
                .expect("send");
        }
        for n in 0..5 {
            let reply: Value = loop {
                if let WsMessage::Text(text) = client.next().await.expect("frame").expect("ok") {
                    break serde_json::from_str(&text).expect("json");
                }
            };
            assert_eq!(reply["id"], n);
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_isolated() {
        let registry = registry();
        let (first, _first_client) = open(&registry).await;
        let (second, mut second_client) = open(&registry).await;
        assert_ne!(first, second);
        assert_eq!(registry.session_count(), 2);

        assert!(registry.close(first).await);
        assert!(!registry.close(first).await);
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.session_state(first), SessionState::Closed);

        let reply = call(
            &mut second_client,
            r#"{"jsonrpc":"2.0","id":"still-here","method":"ping"}"#,
        )
        .await;
        assert_eq!(reply["id"], "still-here");
        assert_eq!(registry.session_state(second), SessionState::Open);
    }

    #[tokio::test]
    async fn test_peer_hangup_removes_only_that_session() {
        let registry = registry();
        let (first, first_client) = open(&registry).await;
        let (second, _second_client) = open(&registry).await;

        drop(first_client);
        for _ in 0..100 {
            if registry.session_state(first) == SessionState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(registry.session_state(first), SessionState::Closed);
        assert_eq!(registry.session_state(second), SessionState::Open);
    }

    #[tokio::test]
    async fn test_notify_and_close_all() {
        let registry = registry();
        let (session_id, mut client) = open(&registry).await;
        let (_, _other) = open(&registry).await;

        registry
            .notify(
                session_id,
                Notification::new("notifications/tools/list_changed", None),
            )
            .expect("notify");
        let frame = loop {
            if let WsMessage::Text(text) = client.next().await.expect("frame").expect("ok") {
                break serde_json::from_str::<Value>(&text).expect("json");
            }
        };
        assert_eq!(frame["method"], "notifications/tools/list_changed");

        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.session_count(), 0);

        let err = registry
            .notify(session_id, Notification::new("x", None))
            .expect_err("closed");
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }
}
