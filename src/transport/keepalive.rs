//! Ping/pong liveness tracking.
//!
//! Shared by the inbound session loop and the external receive loop. Each
//! loop polls [`Keepalive::tick`] inside its `select!` and reports inbound
//! traffic with [`Keepalive::record_activity`].
//!
//! A ping is sent every `interval`. If nothing at all arrives within
//! `timeout` of an unanswered ping, the connection is considered dead.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

// ============================================================================
// KeepaliveAction
// ============================================================================

/// What the owning loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    /// Write a ping frame.
    SendPing,
    /// A ping is outstanding but still within its timeout.
    Wait,
    /// The peer stopped responding.
    Expired,
}

// ============================================================================
// Keepalive
// ============================================================================

/// Liveness state for one connection.
#[derive(Debug)]
pub(crate) struct Keepalive {
    ticker: Option<Interval>,
    timeout: Duration,
    ping_sent_at: Option<Instant>,
}

impl Keepalive {
    /// Creates a tracker. `interval = None` disables pings entirely.
    pub(crate) fn new(interval: Option<Duration>, timeout: Duration) -> Self {
        let ticker = interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            ticker,
            timeout,
            ping_sent_at: None,
        }
    }

    /// Waits for the next tick. Never resolves when disabled.
    pub(crate) async fn tick(&mut self) -> KeepaliveAction {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => pending::<()>().await,
        }

        match self.ping_sent_at {
            None => {
                self.ping_sent_at = Some(Instant::now());
                KeepaliveAction::SendPing
            }
            Some(sent) if sent.elapsed() >= self.timeout => KeepaliveAction::Expired,
            Some(_) => KeepaliveAction::Wait,
        }
    }

    /// Any inbound frame proves the peer is alive.
    pub(crate) fn record_activity(&mut self) {
        self.ping_sent_at = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
