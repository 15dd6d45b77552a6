//! Builders for [`TransportConfig`] and [`Bridge`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_ws_bridge::{Bridge, ToolRegistry};
//!
//! # async fn example() -> mcp_ws_bridge::Result<()> {
//! let bridge = Bridge::builder()
//!     .handler(Arc::new(ToolRegistry::new()))
//!     .mount_path("/mcp")
//!     .external_url("ws://127.0.0.1:9000/ws")
//!     .build()?;
//!
//! let addr = bridge.start().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{McpHandler, ToolRegistry};
use crate::error::{Error, Result};
use crate::transport::external::parse_ws_url;

use super::core::Bridge;
use super::options::TransportConfig;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for every configured timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ============================================================================
// TransportConfigBuilder
// ============================================================================

/// Fluent builder for [`TransportConfig`].
///
/// Use [`TransportConfig::builder()`] to create one.
#[derive(Debug, Default, Clone)]
pub struct TransportConfigBuilder {
    /// Values set so far, starting from the defaults.
    config: TransportConfig,
    /// Unparsed external URL.
    external_url: Option<String>,
}

impl TransportConfigBuilder {
    /// Creates a builder holding the defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    #[inline]
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Sets the path inbound clients must request.
    #[inline]
    #[must_use]
    pub fn mount_path(mut self, path: impl Into<String>) -> Self {
        self.config.mount_path = path.into();
        self
    }

    /// Sets the external peer connected by `start`.
    #[inline]
    #[must_use]
    pub fn external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }

    /// Sets the outbound handshake deadline.
    #[inline]
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Sets the keepalive cadence; `None` disables pings.
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Sets how long a ping may stay unanswered.
    #[inline]
    #[must_use]
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Sets the close handshake bound.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Sets the default outbound request deadline.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the bound on each handler call.
    #[inline]
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    /// Sets the limit on outstanding outbound requests.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.config.max_pending_requests = max;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the mount path does not start with `/`,
    /// the external URL is not `ws`/`wss`, a timeout is zero or above
    /// [`MAX_TIMEOUT`], or the pending limit is zero.
    pub fn build(self) -> Result<TransportConfig> {
        let mut config = self.config;

        if !config.mount_path.starts_with('/') {
            return Err(Error::config(format!(
                "mount path must start with '/', got {:?}",
                config.mount_path
            )));
        }

        if let Some(raw) = self.external_url {
            let url = parse_ws_url(&raw)
                .map_err(|e| Error::config(format!("invalid external URL {raw:?}: {e}")))?;
            config.external_url = Some(url);
        }

        let timeouts = [
            ("connection_timeout", Some(config.connection_timeout)),
            ("ping_interval", config.ping_interval),
            ("ping_timeout", Some(config.ping_timeout)),
            ("close_timeout", Some(config.close_timeout)),
            ("request_timeout", Some(config.request_timeout)),
            ("handler_timeout", Some(config.handler_timeout)),
        ];
        for (name, value) in timeouts {
            match value {
                Some(d) if d.is_zero() => {
                    return Err(Error::config(format!("{name} must be non-zero")));
                }
                Some(d) if d > MAX_TIMEOUT => {
                    return Err(Error::config(format!(
                        "{name} must be at most {}s, got {}s",
                        MAX_TIMEOUT.as_secs(),
                        d.as_secs()
                    )));
                }
                _ => {}
            }
        }

        if config.max_pending_requests == 0 {
            return Err(Error::config("max_pending_requests must be at least 1"));
        }

        Ok(config)
    }
}

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for a [`Bridge`].
///
/// Use [`Bridge::builder()`] to create one. Without a handler, an empty
/// [`ToolRegistry`] is used.
#[derive(Default, Clone)]
pub struct BridgeBuilder {
    /// Injected protocol handler.
    handler: Option<Arc<dyn McpHandler>>,
    /// Transport settings.
    config: TransportConfigBuilder,
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("has_handler", &self.handler.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl BridgeBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the protocol handler requests are dispatched into.
    #[inline]
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn McpHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replaces all transport settings.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: TransportConfigBuilder) -> Self {
        self.config = config;
        self
    }

    /// Sets the listen address.
    #[inline]
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config = self.config.bind_addr(addr);
        self
    }

    /// Sets the inbound mount path.
    #[inline]
    #[must_use]
    pub fn mount_path(mut self, path: impl Into<String>) -> Self {
        self.config = self.config.mount_path(path);
        self
    }

    /// Sets the external peer connected by `start`.
    #[inline]
    #[must_use]
    pub fn external_url(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.external_url(url);
        self
    }

    /// Builds the bridge. Nothing is bound until `start` or `serve`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the settings are invalid.
    pub fn build(self) -> Result<Bridge> {
        let config = self.config.build()?;
        let handler: Arc<dyn McpHandler> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(ToolRegistry::new()),
        };
        Ok(Bridge::new(handler, config))
    }
}

// ============================================================================
// Tests
// ============================================================================
