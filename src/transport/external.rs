//! Outbound connection to an external MCP server.
//!
//! The connector owns at most one WebSocket connection. A background
//! receive loop routes replies to the [`RequestCorrelator`] and forwards
//! everything else to the [`Dispatcher`] as unsolicited traffic.
//!
//! # Event Loop
//!
//! The loop spawned by [`ExternalConnector::connect`] handles:
//!
//! - Incoming frames (replies, notifications, stray requests)
//! - Outgoing frames queued by `send_request` / `notify`
//! - Keepalive pings
//! - Close requests from `disconnect`
//!
//! When it ends for any reason, every pending request is failed with
//! [`Error::ConnectionClosed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::bridge::TransportConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{ErrorResponse, Message, Notification, Request, RequestId, Response};

use super::correlator::RequestCorrelator;
use super::keepalive::{Keepalive, KeepaliveAction};
use super::observer::{Observers, TransportEvent};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Receive loop running.
    Connected,
}

// ============================================================================
// LoopCommand
// ============================================================================

/// Internal commands for the receive loop.
enum LoopCommand {
    /// Write a request frame; failures resolve `id`.
    Send { id: RequestId, frame: String },
    /// Write a notification frame.
    Notify(String),
    /// Close the socket and stop.
    Close,
}

// ============================================================================
// Link
// ============================================================================

/// Shared view of the live connection.
///
/// `generation` lets a loop that exits on its own clear only the link it
/// was started with, never a newer one.
struct Link {
    state: ConnectionState,
    command_tx: Option<mpsc::UnboundedSender<LoopCommand>>,
    url: Option<Url>,
    generation: u64,
}

/// Returns a `Connecting` link to `Disconnected` unless disarmed.
///
/// Covers a `connect` future dropped mid-handshake.
struct ConnectingGuard<'a> {
    link: &'a RwLock<Link>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut link = self.link.write();
        if link.state == ConnectionState::Connecting {
            link.state = ConnectionState::Disconnected;
        }
    }
}

// ============================================================================
// ExternalConnector
// ============================================================================

/// Client role: one outbound connection with correlated requests.
///
/// # Thread Safety
///
/// `connect` and `disconnect` serialize on an async lock held across the
/// handshake and the loop shutdown. Sends only touch a short-lived
/// read lock and never wait on either.
pub struct ExternalConnector {
    /// Guards connect/disconnect; holds the receive loop task.
    lifecycle: Mutex<Option<JoinHandle<()>>>,
    /// Current connection, readable without the lifecycle lock.
    link: RwLock<Link>,
    /// Outstanding requests.
    correlator: Arc<RequestCorrelator>,
    /// Receives unsolicited frames.
    dispatcher: Arc<Dispatcher>,
    /// Lifecycle subscribers.
    observers: Arc<Observers>,
    /// Timeouts and keepalive.
    config: Arc<TransportConfig>,
}

impl std::fmt::Debug for ExternalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.link.read();
        f.debug_struct("ExternalConnector")
            .field("state", &link.state)
            .field("url", &link.url.as_ref().map(Url::as_str))
            .field("pending", &self.correlator.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ExternalConnector - Public API
// ============================================================================

impl ExternalConnector {
    /// Creates a disconnected connector.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        correlator: Arc<RequestCorrelator>,
        observers: Arc<Observers>,
        config: Arc<TransportConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Mutex::new(None),
            link: RwLock::new(Link {
                state: ConnectionState::Disconnected,
                command_tx: None,
                url: None,
                generation: 0,
            }),
            correlator,
            dispatcher,
            observers,
            config,
        })
    }

    /// Connects to `url` and starts the receive loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] / [`Error::Config`] if `url` is not a `ws`/`wss` URL
    /// - [`Error::AlreadyConnected`] if a connection is live
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds `connection_timeout`
    /// - [`Error::Connection`] if the handshake fails
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<()> {
        let url = parse_ws_url(url)?;
        let mut task = self.lifecycle.lock().await;

        {
            let mut link = self.link.write();
            if link.state != ConnectionState::Disconnected {
                return Err(Error::AlreadyConnected);
            }
            link.state = ConnectionState::Connecting;
        }
        let mut guard = ConnectingGuard {
            link: &self.link,
            armed: true,
        };

        info!(url = %url, "Connecting to external MCP server");

        let connect_timeout = self.config.connection_timeout;
        let ws_stream = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                error!(url = %url, error = %e, "Failed to connect to external MCP server");
                return Err(Error::connection(format!("{url}: {e}")));
            }
            Err(_) => {
                error!(url = %url, "Timed out connecting to external MCP server");
                return Err(Error::connection_timeout(connect_timeout.as_millis() as u64));
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let generation = {
            guard.disarm();
            let mut link = self.link.write();
            link.generation += 1;
            link.state = ConnectionState::Connected;
            link.command_tx = Some(command_tx);
            link.url = Some(url.clone());
            link.generation
        };

        self.observers.emit(&TransportEvent::ExternalConnected {
            url: url.to_string(),
        });

        // A previous loop that ended on its own has already finished.
        *task = Some(tokio::spawn(
            Arc::clone(self).receive_loop(ws_stream, command_rx, generation),
        ));

        info!(url = %url, "Connected to external MCP server");
        Ok(())
    }

    /// Sends a request and waits up to `request_timeout` for its reply.
    ///
    /// # Errors
    ///
    /// See [`send_request_with_timeout`](Self::send_request_with_timeout).
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        self.send_request_with_timeout(request, self.config.request_timeout)
            .await
    }

    /// Sends a request and waits up to `request_timeout` for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no connection is live
    /// - [`Error::DuplicateId`] if the id is already pending
    /// - [`Error::TooManyPending`] if the admission limit is reached
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::ConnectionClosed`] if the connection drops first
    /// - [`Error::Rpc`] if the peer answers with an Error frame
    pub async fn send_request_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> Result<Response> {
        let command_tx = self.command_tx()?;

        let id = request.id.clone();
        let frame = Message::Request(request).encode()?;

        // Register before writing so a fast reply always finds its waiter.
        let waiter = self.correlator.register(id.clone(), request_timeout)?;

        if command_tx
            .send(LoopCommand::Send {
                id: id.clone(),
                frame,
            })
            .is_err()
        {
            self.correlator.unregister(&id);
            return Err(Error::NotConnected);
        }

        self.correlator.wait(waiter).await
    }

    /// Sends a notification without waiting for anything.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no connection is live
    pub fn notify(&self, notification: Notification) -> Result<()> {
        let command_tx = self.command_tx()?;
        let frame = Message::Notification(notification).encode()?;
        command_tx
            .send(LoopCommand::Notify(frame))
            .map_err(|_| Error::NotConnected)
    }

    /// Closes the connection and fails every pending request.
    ///
    /// Idempotent.
    pub async fn disconnect(&self) {
        let mut task = self.lifecycle.lock().await;

        let command_tx = {
            let mut link = self.link.write();
            link.state = ConnectionState::Disconnected;
            link.url = None;
            link.command_tx.take()
        };
        let was_connected = command_tx.is_some();

        if let Some(command_tx) = command_tx {
            let _ = command_tx.send(LoopCommand::Close);
        }

        if let Some(mut handle) = task.take() {
            let grace = self.config.close_timeout + Duration::from_millis(100);
            match timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "External receive loop failed"),
                Err(_) => {
                    warn!("External receive loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let cancelled = self.correlator.cancel_all("external connection closed");

        if was_connected {
            self.observers.emit(&TransportEvent::ExternalDisconnected);
            info!(cancelled, "Disconnected from external MCP server");
        }
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.link.read().state
    }

    /// Returns `true` if a connection is live.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the URL of the live connection.
    #[must_use]
    pub fn url(&self) -> Option<Url> {
        self.link.read().url.clone()
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    fn command_tx(&self) -> Result<mpsc::UnboundedSender<LoopCommand>> {
        self.link
            .read()
            .command_tx
            .clone()
            .ok_or(Error::NotConnected)
    }
}

// ============================================================================
// ExternalConnector - Receive Loop
// ============================================================================

impl ExternalConnector {
    async fn receive_loop<S>(
        self: Arc<Self>,
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        generation: u64,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut keepalive = Keepalive::new(self.config.ping_interval, self.config.ping_timeout);

        let reason = loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            keepalive.record_activity();
                            trace!(text = %text.as_str(), "Frame received from external server");
                            self.route(&text);
                        }

                        Some(Ok(WsMessage::Binary(_))) => {
                            keepalive.record_activity();
                            warn!("Ignoring binary frame from external server");
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            debug!("External WebSocket closed by remote");
                            break "external connection closed by peer";
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "External WebSocket error");
                            break "external connection failed";
                        }

                        None => {
                            debug!("External WebSocket stream ended");
                            break "external connection ended";
                        }

                        // Ping, Pong, raw frames
                        Some(Ok(_)) => keepalive.record_activity(),
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { id, frame }) => {
                            if let Err(e) = ws_write.send(WsMessage::Text(frame.into())).await {
                                warn!(%id, error = %e, "Failed to send request");
                                self.correlator.resolve(&id, Err(Error::connection(e.to_string())));
                                break "external connection failed";
                            }
                            trace!(%id, "Request sent");
                        }

                        Some(LoopCommand::Notify(frame)) => {
                            if let Err(e) = ws_write.send(WsMessage::Text(frame.into())).await {
                                warn!(error = %e, "Failed to send notification");
                                break "external connection failed";
                            }
                        }

                        Some(LoopCommand::Close) | None => {
                            self.close_socket(&mut ws_write).await;
                            break "external connection closed";
                        }
                    }
                }

                action = keepalive.tick() => {
                    match action {
                        KeepaliveAction::SendPing => {
                            if let Err(e) = ws_write.send(WsMessage::Ping(Vec::new().into())).await {
                                warn!(error = %e, "Failed to send ping");
                                break "external connection failed";
                            }
                        }
                        KeepaliveAction::Wait => {}
                        KeepaliveAction::Expired => {
                            warn!("External keepalive timed out");
                            self.close_socket(&mut ws_write).await;
                            break "external keepalive timed out";
                        }
                    }
                }
            }
        };

        // Refuse new sends before failing the ones already registered.
        command_rx.close();

        let lost = {
            let mut link = self.link.write();
            if link.generation == generation && link.command_tx.is_some() {
                link.state = ConnectionState::Disconnected;
                link.command_tx = None;
                link.url = None;
                true
            } else {
                false
            }
        };

        self.correlator.cancel_all(reason);

        if lost {
            warn!(reason, "External connection lost");
            self.observers.emit(&TransportEvent::ExternalDisconnected);
        }

        debug!("External receive loop terminated");
    }

    /// Delivers replies to their waiters; everything else is unsolicited.
    fn route(&self, text: &str) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Invalid message from external server");
                return;
            }
        };

        match message {
            Message::Response(response) if self.correlator.contains(&response.id) => {
                let id = response.id.clone();
                self.correlator.resolve(&id, Ok(response));
            }

            Message::Error(ErrorResponse {
                id: Some(id),
                error,
            }) if self.correlator.contains(&id) => {
                self.correlator.resolve(&id, Err(error.into()));
            }

            other => {
                if other.is_reply() {
                    warn!(id = ?other.id(), "Received response for unknown request ID");
                }
                self.dispatcher.handle_unsolicited(other);
            }
        }
    }

    async fn close_socket<S>(&self, ws_write: &mut SplitSink<WebSocketStream<S>, WsMessage>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(self.config.close_timeout, ws_write.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "External close handshake failed"),
            Err(_) => debug!("External close handshake timed out"),
        }
    }
}

/// Parses and checks an external peer URL.
pub(crate) fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::config(format!(
            "external URL must use ws or wss, got {other}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use crate::dispatch::ToolRegistry;

    /// How the fake peer answers.
    #[derive(Clone, Copy)]
    enum Peer {
        /// Reply to every request with `{"echo": method}`.
        Echo,
        /// Read everything, answer nothing.
        Silent,
        /// Collect `n` requests, then answer them in reverse order.
        Reversed(usize),
        /// Push a notification, then behave like `Echo`.
        Chatty,
        /// Close right after the upgrade.
        HangUp,
    }

    async fn spawn_peer(mode: Peer) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");

            if matches!(mode, Peer::HangUp) {
                let _ = ws.close(None).await;
                return;
            }

            if matches!(mode, Peer::Chatty) {
                let push = Message::Notification(Notification::new("notifications/progress", None));
                let _ = ws
                    .send(WsMessage::Text(push.encode().expect("encode").into()))
                    .await;
            }

            let mut held = Vec::new();
            while let Some(Ok(frame)) = ws.next().await {
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let Ok(Message::Request(request)) = Message::decode(&text) else {
                    continue;
                };
                let reply = Message::Response(Response::new(
                    request.id.clone(),
                    json!({ "echo": request.method }),
                ));

                match mode {
                    Peer::Echo | Peer::Chatty => {
                        let _ = ws
                            .send(WsMessage::Text(reply.encode().expect("encode").into()))
                            .await;
                    }
                    Peer::Silent | Peer::HangUp => {}
                    Peer::Reversed(n) => {
                        held.push(reply);
                        if held.len() == n {
                            while let Some(reply) = held.pop() {
                                let _ = ws
                                    .send(WsMessage::Text(reply.encode().expect("encode").into()))
                                    .await;
                            }
                        }
                    }
                }
            }
        });

        format!("ws://{addr}")
    }

    fn connector_with(observers: Arc<Observers>) -> Arc<ExternalConnector> {
        let config = TransportConfig::builder()
            .close_timeout(Duration::from_millis(200))
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("config");
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ToolRegistry::new()),
            Duration::from_secs(1),
            Arc::clone(&observers),
        ));
        ExternalConnector::new(
            dispatcher,
            Arc::new(RequestCorrelator::new(100)),
            observers,
            Arc::new(config),
        )
    }

    fn connector() -> Arc<ExternalConnector> {
        connector_with(Arc::new(Observers::new()))
    }

    #[tokio::test]
    async fn test_send_before_connect_is_not_connected() {
        let connector = connector();
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        let err = connector
            .send_request(Request::new("tools/list", None))
            .await
            .expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));

        let err = connector
            .notify(Notification::new("x", None))
            .expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_and_request() {
        let url = spawn_peer(Peer::Echo).await;
        let connector = connector();

        connector.connect(&url).await.expect("connect");
        assert!(connector.is_connected());

        let response = connector
            .send_request(Request::with_id(1_i64, "tools/list", None))
            .await
            .expect("reply");
        assert_eq!(response.id, RequestId::Number(1));
        assert_eq!(response.result, json!({ "echo": "tools/list" }));
        assert_eq!(connector.pending_count(), 0);

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let url = spawn_peer(Peer::Echo).await;
        let connector = connector();

        connector.connect(&url).await.expect("connect");
        let err = connector.connect(&url).await.expect_err("second connect");
        assert!(matches!(err, Error::AlreadyConnected));

        let response = connector
            .send_request(Request::new("ping", None))
            .await
            .expect("still usable");
        assert_eq!(response.result["echo"], "ping");

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let url = spawn_peer(Peer::Reversed(3)).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        let calls = ["a/one", "b/two", "c/three"].map(|method| {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                let request = Request::new(method, None);
                let id = request.id.clone();
                let response = connector.send_request(request).await.expect("reply");
                (id, method, response)
            })
        });

        for call in calls {
            let (id, method, response) = call.await.expect("join");
            assert_eq!(response.id, id);
            assert_eq!(response.result["echo"], method);
        }

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_nothing_pending() {
        let url = spawn_peer(Peer::Silent).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        let err = connector
            .send_request_with_timeout(
                Request::with_id("slow", "tools/list", None),
                Duration::from_millis(100),
            )
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
        assert_eq!(connector.pending_count(), 0);

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_requests() {
        let url = spawn_peer(Peer::Silent).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        let waiting = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                connector
                    .send_request(Request::new("tools/list", None))
                    .await
            })
        };

        while connector.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        connector.disconnect().await;
        connector.disconnect().await;

        let err = waiting.await.expect("join").expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed { .. }));
        assert_eq!(connector.pending_count(), 0);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unsolicited_frames_reach_observers() {
        let observers = Arc::new(Observers::new());
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observers.subscribe(Arc::new(move |event: &TransportEvent| {
            sink.lock().push(event.clone());
        }));

        let url = spawn_peer(Peer::Chatty).await;
        let connector = connector_with(observers);
        connector.connect(&url).await.expect("connect");

        // The echo reply is ordered after the pushed notification.
        connector
            .send_request(Request::new("ping", None))
            .await
            .expect("reply");
        connector.disconnect().await;

        let events = seen.lock().clone();
        assert!(matches!(events.first(), Some(TransportEvent::ExternalConnected { .. })));
        assert!(events.iter().any(|event| matches!(
            event,
            TransportEvent::Unsolicited { message } if message.method() == Some("notifications/progress")
        )));
        assert_eq!(events.last(), Some(&TransportEvent::ExternalDisconnected));
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let connector = connector();
        let err = connector
            .connect(&format!("ws://{addr}"))
            .await
            .expect_err("refused");
        assert!(err.is_connection_error());
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancelled_send_leaves_nothing_pending() {
        let url = spawn_peer(Peer::Silent).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        for _ in 0..3 {
            let call = connector.send_request(Request::new("tools/list", None));
            assert!(timeout(Duration::from_millis(50), call).await.is_err());
        }
        assert_eq!(connector.pending_count(), 0);

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_huge_request_timeout() {
        let url = spawn_peer(Peer::Echo).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        let response = connector
            .send_request_with_timeout(Request::new("ping", None), Duration::MAX)
            .await
            .expect("reply");
        assert_eq!(response.result["echo"], "ping");

        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_cancelled_connect_can_retry() {
        // Accepts TCP but never answers the upgrade.
        let stalled = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let stalled_url = format!("ws://{}", stalled.local_addr().expect("addr"));
        let held = tokio::spawn(async move {
            let (_stream, _) = stalled.accept().await.expect("accept");
            std::future::pending::<()>().await;
        });

        let connector = connector();
        let attempt = timeout(Duration::from_millis(100), connector.connect(&stalled_url)).await;
        assert!(attempt.is_err());
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        let url = spawn_peer(Peer::Echo).await;
        connector.connect(&url).await.expect("reconnect");
        assert!(connector.is_connected());

        connector.disconnect().await;
        held.abort();
    }

    #[tokio::test]
    async fn test_send_after_peer_hangup_fails_fast() {
        let url = spawn_peer(Peer::HangUp).await;
        let connector = connector();
        connector.connect(&url).await.expect("connect");

        timeout(Duration::from_secs(5), async {
            while connector.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("loop noticed hang-up");

        let err = timeout(
            Duration::from_secs(1),
            connector.send_request_with_timeout(Request::new("ping", None), Duration::from_secs(30)),
        )
        .await
        .expect("no full-timeout wait")
        .expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(connector.pending_count(), 0);
    }

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("ws://localhost:9000/mcp").is_ok());
        assert!(parse_ws_url("wss://example.com/ws").is_ok());
        assert!(matches!(
            parse_ws_url("http://localhost:9000"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(parse_ws_url("not a url"), Err(Error::Url(_))));
    }
}
