//! TCP accept loop for inbound sessions.
//!
//! Upgrades connections whose request path equals the configured mount
//! path and hands the resulting WebSocket to the [`SessionRegistry`].
//! Any other path is refused with HTTP 404 during the handshake.
//!
//! # Connection Flow
//!
//! 1. [`InboundServer::spawn`] takes a bound listener and starts the loop
//! 2. A client opens `ws://host:port{mount_path}`
//! 3. The handshake callback checks the path
//! 4. [`SessionRegistry::accept`] registers the session and starts its loop

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse as HttpRejection, Request as HttpRequest, Response as HttpResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::bridge::TransportConfig;
use crate::error::{Error, Result};

use super::session::SessionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// InboundServer
// ============================================================================

/// Running accept loop bound to one listener.
pub struct InboundServer {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Sessions created by this server.
    registry: Arc<SessionRegistry>,
    /// Mount path and handshake deadline.
    config: Arc<TransportConfig>,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Accept loop task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InboundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundServer")
            .field("local_addr", &self.local_addr)
            .field("mount_path", &self.config.mount_path)
            .finish_non_exhaustive()
    }
}

impl InboundServer {
    /// Starts accepting on `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener has no local address.
    pub fn spawn(
        listener: TcpListener,
        registry: Arc<SessionRegistry>,
        config: Arc<TransportConfig>,
    ) -> Result<Arc<Self>> {
        let local_addr = listener.local_addr()?;

        let server = Arc::new(Self {
            local_addr,
            registry,
            config,
            shutdown: AtomicBool::new(false),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(Arc::clone(&server).accept_loop(listener));
        *server.task.lock() = Some(task);

        info!(
            addr = %local_addr,
            mount_path = %server.config.mount_path,
            "WebSocket server listening"
        );

        Ok(server)
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the URL clients connect to.
    ///
    /// Format: `ws://{addr}{mount_path}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.config.mount_path)
    }

    /// Stops accepting, aborts handshakes in flight and releases the listener.
    ///
    /// Once this returns no new session can appear. Open sessions are
    /// untouched. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Accept loop failed");
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

// ============================================================================
// InboundServer - Accept Loop
// ============================================================================

impl InboundServer {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        let mut handshakes = JoinSet::new();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            tokio::select! {
                // Bounded so the shutdown flag is observed promptly.
                accepted = timeout(ACCEPT_POLL_INTERVAL, listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, addr))) => {
                            let server = Arc::clone(&self);
                            handshakes.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, addr).await {
                                    warn!(error = %e, %addr, "Connection handling failed");
                                }
                            });
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "Accept failed");
                        }
                        Err(_) => {}
                    }
                }

                Some(joined) = handshakes.join_next() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        error!(error = %e, "Handshake task panicked");
                    }
                }
            }
        }

        let in_flight = handshakes.len();
        handshakes.shutdown().await;
        if in_flight > 0 {
            debug!(in_flight, "Aborted pending handshakes");
        }

        debug!("Accept loop terminated");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "New TCP connection");

        let mount_path = self.config.mount_path.clone();
        let check_path = move |request: &HttpRequest,
                               response: HttpResponse|
              -> std::result::Result<HttpResponse, HttpRejection> {
            if request.uri().path() == mount_path {
                Ok(response)
            } else {
                let mut rejection = HttpRejection::new(Some("Not Found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let handshake_timeout = self.config.connection_timeout;
        let ws_stream = timeout(handshake_timeout, accept_hdr_async(stream, check_path))
            .await
            .map_err(|_| Error::connection_timeout(handshake_timeout.as_millis() as u64))?
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let session_id = self.registry.accept(ws_stream);
        debug!(session_id = %session_id, %addr, "Session accepted");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
