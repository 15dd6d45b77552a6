//! Dual-role bridge and lifecycle manager.
//!
//! The [`Bridge`] owns every transport component and is the single object
//! a host application holds: it starts the inbound server, optionally
//! auto-connects the external peer and tears everything down in order.
//!
//! # Shutdown Order
//!
//! 1. Stop accepting inbound connections
//! 2. Close every inbound session, tolerating individual failures
//! 3. Disconnect the external connection
//! 4. Fail any request still left in the correlator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_ws_bridge::{Bridge, Tool, ToolRegistry};
//!
//! # async fn example() -> mcp_ws_bridge::Result<()> {
//! let tools = Arc::new(ToolRegistry::new());
//! tools.register(Tool::new("list_alarms", "List all alarms"));
//!
//! let bridge = Bridge::builder().handler(tools).build()?;
//! let addr = bridge.start().await?;
//! println!("listening on {addr}");
//!
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, McpHandler};
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{Notification, Request, Response};
use crate::transport::{
    ExternalConnector, InboundServer, Observers, RequestCorrelator, SessionRegistry,
    TransportObserver,
};

use super::builder::BridgeBuilder;
use super::options::TransportConfig;

// ============================================================================
// Types
// ============================================================================

/// Shared state behind a [`Bridge`].
pub(crate) struct BridgeInner {
    /// Immutable settings.
    config: Arc<TransportConfig>,
    /// Lifecycle subscribers.
    observers: Arc<Observers>,
    /// Outbound pending requests.
    correlator: Arc<RequestCorrelator>,
    /// Inbound sessions.
    sessions: Arc<SessionRegistry>,
    /// Outbound connection.
    external: Arc<ExternalConnector>,
    /// Accept loop, once started.
    server: Mutex<Option<Arc<InboundServer>>>,
}

// ============================================================================
// Bridge
// ============================================================================

/// Server and client roles of one MCP transport.
///
/// Cheap to clone; clones share the same transport.
#[derive(Clone)]
pub struct Bridge {
    /// Shared inner state.
    pub(crate) inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("local_addr", &self.local_addr())
            .field("sessions", &self.inner.sessions.session_count())
            .field("external", &self.inner.external.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Construction
// ============================================================================

impl Bridge {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Wires every component around `handler`. Nothing is bound yet.
    #[must_use]
    pub fn new(handler: Arc<dyn McpHandler>, config: TransportConfig) -> Self {
        let config = Arc::new(config);
        let observers = Arc::new(Observers::new());
        let correlator = Arc::new(RequestCorrelator::new(config.max_pending_requests));
        let dispatcher = Arc::new(Dispatcher::new(
            handler,
            config.handler_timeout,
            Arc::clone(&observers),
        ));

        let sessions = SessionRegistry::new(
            Arc::clone(&dispatcher),
            Arc::clone(&observers),
            Arc::clone(&config),
        );
        let external = ExternalConnector::new(
            dispatcher,
            Arc::clone(&correlator),
            Arc::clone(&observers),
            Arc::clone(&config),
        );

        Self {
            inner: Arc::new(BridgeInner {
                config,
                observers,
                correlator,
                sessions,
                external,
                server: Mutex::new(None),
            }),
        }
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Binds `bind_addr`, starts accepting and auto-connects the external
    /// peer if one is configured.
    ///
    /// A failed auto-connect is logged and does not fail `start`; call
    /// [`connect_external`](Self::connect_external) to retry.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if binding fails
    /// - [`Error::Connection`] if the bridge is already serving
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.inner.config.bind_addr).await?;
        let addr = self.serve(listener)?;

        if let Some(url) = self.inner.config.external_url.clone() {
            match self.inner.external.connect(url.as_str()).await {
                Ok(()) => info!(url = %url, "Auto-connected to external MCP server"),
                Err(e) => error!(url = %url, error = %e, "Failed to auto-connect to external MCP server"),
            }
        }

        Ok(addr)
    }

    /// Starts accepting on a listener the host already bound.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the listener has no local address
    /// - [`Error::Connection`] if the bridge is already serving
    pub fn serve(&self, listener: TcpListener) -> Result<SocketAddr> {
        let mut server = self.inner.server.lock();
        if server.is_some() {
            return Err(Error::connection("inbound server is already running"));
        }

        let running = InboundServer::spawn(
            listener,
            Arc::clone(&self.inner.sessions),
            Arc::clone(&self.inner.config),
        )?;
        let addr = running.local_addr();
        *server = Some(running);

        Ok(addr)
    }

    /// Stops everything and fails every pending request.
    ///
    /// Idempotent. A stopped bridge may be started again.
    pub async fn shutdown(&self) {
        info!("Shutting down MCP WebSocket transport");

        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.shutdown().await;
            debug!("Accept loop stopped");
        }

        let closed = self.inner.sessions.close_all().await;
        debug!(closed, "Inbound sessions closed");

        self.inner.external.disconnect().await;

        let leaked = self.inner.correlator.cancel_all("transport shut down");
        if leaked > 0 {
            warn!(leaked, "Pending requests cancelled after disconnect");
        }

        info!("MCP WebSocket transport shut down");
    }
}

// ============================================================================
// Bridge - Client Role
// ============================================================================

impl Bridge {
    /// Connects the external peer.
    ///
    /// # Errors
    ///
    /// See [`ExternalConnector::connect`].
    pub async fn connect_external(&self, url: &str) -> Result<()> {
        self.inner.external.connect(url).await
    }

    /// Closes the external connection. Idempotent.
    pub async fn disconnect_external(&self) {
        self.inner.external.disconnect().await;
    }

    /// Sends a request to the external peer.
    ///
    /// # Errors
    ///
    /// See [`ExternalConnector::send_request_with_timeout`].
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        self.inner.external.send_request(request).await
    }

    /// Sends a notification to the external peer.
    ///
    /// # Errors
    ///
    /// See [`ExternalConnector::notify`].
    pub fn notify_external(&self, notification: Notification) -> Result<()> {
        self.inner.external.notify(notification)
    }
}

// ============================================================================
// Bridge - Accessors
// ============================================================================

impl Bridge {
    /// Returns the settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Returns the inbound session registry.
    ///
    /// Hosts that upgrade sockets themselves pass them to
    /// [`SessionRegistry::accept`].
    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    /// Returns the outbound connector.
    #[inline]
    #[must_use]
    pub fn external(&self) -> &Arc<ExternalConnector> {
        &self.inner.external
    }

    /// Returns the bound address while serving.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.server.lock().as_ref().map(|s| s.local_addr())
    }

    /// Returns the URL inbound clients connect to while serving.
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.inner.server.lock().as_ref().map(|s| s.ws_url())
    }

    /// Returns the number of open inbound sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.session_count()
    }

    /// Returns the number of outbound requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Registers an observer for transport events.
    pub fn subscribe(&self, observer: Arc<dyn TransportObserver>) -> SubscriptionId {
        self.inner.observers.subscribe(observer)
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use parking_lot::Mutex as SyncMutex;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{accept_async, connect_async};

    use crate::dispatch::ToolRegistry;
    use crate::transport::{ConnectionState, TransportEvent};

    fn bridge(external: Option<String>) -> Bridge {
        let mut config = TransportConfig::builder().close_timeout(Duration::from_millis(200));
        if let Some(url) = external {
            config = config.external_url(url);
        }
        Bridge::builder()
            .handler(Arc::new(ToolRegistry::new()))
            .config(config)
            .build()
            .expect("bridge")
    }

    async fn silent_peer() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn test_start_and_serve_twice() {
        let bridge = bridge(None);
        let addr = bridge.start().await.expect("start");
        assert_eq!(bridge.local_addr(), Some(addr));
        assert!(bridge.ws_url().is_some_and(|u| u.ends_with("/ws")));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let err = bridge.serve(listener).expect_err("already serving");
        assert!(err.is_connection_error());

        bridge.shutdown().await;
        assert_eq!(bridge.local_addr(), None);
    }

    #[tokio::test]
    async fn test_start_auto_connects() {
        let url = silent_peer().await;
        let bridge = bridge(Some(url));

        bridge.start().await.expect("start");
        assert_eq!(bridge.external().state(), ConnectionState::Connected);

        bridge.shutdown().await;
        assert_eq!(bridge.external().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_auto_connect_does_not_fail_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let bridge = bridge(Some(format!("ws://{addr}/ws")));
        bridge.start().await.expect("start");
        assert_eq!(bridge.external().state(), ConnectionState::Disconnected);

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_and_is_idempotent() {
        let url = silent_peer().await;
        let bridge = bridge(None);

        let events = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bridge.subscribe(Arc::new(move |event: &TransportEvent| {
            sink.lock().push(event.clone());
        }));

        bridge.start().await.expect("start");
        bridge.connect_external(&url).await.expect("connect");

        let ws_url = bridge.ws_url().expect("serving");
        let (mut client, _) = connect_async(ws_url).await.expect("client");
        client
            .send(WsMessage::Text(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into()))
            .await
            .expect("send");
        let _ = client.next().await;
        assert_eq!(bridge.session_count(), 1);

        let waiting = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send_request(Request::new("tools/list", None)).await })
        };
        while bridge.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        bridge.shutdown().await;
        bridge.shutdown().await;

        assert_eq!(bridge.session_count(), 0);
        assert_eq!(bridge.pending_count(), 0);
        let err = waiting.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, Error::ConnectionClosed { .. }));

        let events = events.lock();
        assert!(events.iter().any(|e| matches!(e, TransportEvent::SessionClosed { .. })));
        assert!(events.contains(&TransportEvent::ExternalDisconnected));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bridge = bridge(None);
        let id = bridge.subscribe(Arc::new(|_: &TransportEvent| {}));
        assert!(bridge.unsubscribe(id));
        assert!(!bridge.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_notify_without_connection() {
        let bridge = bridge(None);
        let err = bridge
            .notify_external(Notification::new("x", None))
            .expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));
    }
}
