//! Transport configuration.
//!
//! [`TransportConfig`] is immutable once built and shared via `Arc` by every
//! component of a [`Bridge`](super::Bridge).
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use mcp_ws_bridge::TransportConfig;
//!
//! let config = TransportConfig::builder()
//!     .mount_path("/mcp")
//!     .external_url("ws://127.0.0.1:9000/ws")
//!     .request_timeout(Duration::from_secs(10))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use url::Url;

use super::builder::TransportConfigBuilder;

// ============================================================================
// Defaults
// ============================================================================

/// Default path inbound clients connect to.
pub const DEFAULT_MOUNT_PATH: &str = "/ws";

/// Default outbound handshake deadline.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default keepalive ping cadence.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default keepalive timeout.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Default close handshake bound.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default `send_request` deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single handler call.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on outstanding outbound requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// TransportConfig
// ============================================================================

/// Settings for both transport roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Where [`Bridge::start`](super::Bridge::start) listens.
    pub bind_addr: SocketAddr,

    /// Only upgrade requests for this path are accepted.
    pub mount_path: String,

    /// External peer auto-connected by `start`.
    pub external_url: Option<Url>,

    /// Outbound handshake deadline.
    pub connection_timeout: Duration,

    /// Keepalive ping cadence; `None` disables pings.
    pub ping_interval: Option<Duration>,

    /// How long an unanswered ping may stay unanswered.
    pub ping_timeout: Duration,

    /// Bound on close handshakes.
    pub close_timeout: Duration,

    /// Default deadline for outbound requests.
    pub request_timeout: Duration,

    /// Bound on each call into the handler.
    pub handler_timeout: Duration,

    /// Correlator admission limit.
    pub max_pending_requests: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            external_url: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

impl TransportConfig {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Returns `true` if an external peer is configured.
    #[inline]
    #[must_use]
    pub fn has_external(&self) -> bool {
        self.external_url.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
