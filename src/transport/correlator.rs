//! Request/response correlation.
//!
//! Maps outstanding request ids to single-fire waiters so that replies read
//! by a receive loop reach the task that issued the request.
//!
//! # Lifecycle
//!
//! ```text
//! register(id) ──► PendingRequest ──┬─► resolve(id, reply)   (reply arrives)
//!                                   ├─► wait() deadline       (RequestTimeout, entry removed)
//!                                   ├─► cancel_all(reason)    (ConnectionClosed)
//!                                   └─► Waiter dropped        (entry removed)
//! ```
//!
//! Whichever happens first wins; an entry is resolved at most once.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{RequestId, Response};

// ============================================================================
// Constants
// ============================================================================

/// Deadline offset used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered to a waiter.
type Outcome = Result<Response>;

/// Pending requests keyed by id.
type PendingTable = Mutex<FxHashMap<RequestId, PendingRequest>>;

/// An outstanding request.
struct PendingRequest {
    /// Single-fire wake-up.
    tx: oneshot::Sender<Outcome>,
    /// When the caller stops waiting.
    deadline: Instant,
    /// Registration this entry belongs to.
    token: u64,
}

// ============================================================================
// Waiter
// ============================================================================

/// Handle returned by [`RequestCorrelator::register`].
///
/// Pass it back to [`RequestCorrelator::wait`] to await the reply.
/// Dropping it, including by dropping the `wait` future, removes the entry.
#[derive(Debug)]
pub struct Waiter {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    deadline: Instant,
    timeout: Duration,
    token: u64,
    table: Weak<PendingTable>,
}

impl Waiter {
    /// The request id this waiter is keyed by.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// When the wait gives up.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut pending = table.lock();
        // The id may already belong to a newer registration.
        if pending
            .get(&self.id)
            .is_some_and(|entry| entry.token == self.token)
        {
            pending.remove(&self.id);
            trace!(id = %self.id, "Pending request abandoned");
        }
    }
}

// ============================================================================
// RequestCorrelator
// ============================================================================

/// Table of pending requests keyed by id.
///
/// Thread-safe; the lock is never held across an await.
pub struct RequestCorrelator {
    pending: Arc<PendingTable>,
    next_token: AtomicU64,
    max_pending: usize,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl RequestCorrelator {
    /// Creates an empty correlator admitting at most `max_pending` waiters.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            next_token: AtomicU64::new(0),
            max_pending,
        }
    }

    /// Registers a waiter for `id` that gives up after `timeout`.
    ///
    /// A timeout too large to represent waits for decades instead.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if `id` is already pending
    /// - [`Error::TooManyPending`] if the admission limit is reached
    pub fn register(&self, id: RequestId, timeout: Duration) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(Error::duplicate_id(id));
        }
        if pending.len() >= self.max_pending {
            warn!(
                pending = pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: pending.len(),
                max: self.max_pending,
            });
        }
        pending.insert(
            id.clone(),
            PendingRequest {
                tx,
                deadline,
                token,
            },
        );
        drop(pending);

        trace!(%id, "Pending request registered");

        Ok(Waiter {
            id,
            rx,
            deadline,
            timeout,
            token,
            table: Arc::downgrade(&self.pending),
        })
    }

    /// Waits for the reply registered under `waiter`.
    ///
    /// On timeout the entry is removed before returning.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the deadline passes first
    /// - [`Error::ConnectionClosed`] if the request was cancelled
    /// - [`Error::Rpc`] if the peer answered with an Error frame
    pub async fn wait(&self, mut waiter: Waiter) -> Result<Response> {
        match timeout_at(waiter.deadline, &mut waiter.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::connection_closed("pending request dropped")),
            // Dropping the waiter on return removes its entry.
            Err(_) => {
                debug!(id = %waiter.id, "Pending request timed out");
                let timeout_ms = u64::try_from(waiter.timeout.as_millis()).unwrap_or(u64::MAX);
                Err(Error::request_timeout(waiter.id.clone(), timeout_ms))
            }
        }
    }

    /// Delivers `outcome` to the waiter for `id` and removes the entry.
    ///
    /// Returns `false` (and logs a warning) if nobody is waiting, which
    /// happens when the caller already gave up.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let entry = self.pending.lock().remove(id);

        match entry {
            Some(entry) => {
                if Instant::now() > entry.deadline {
                    trace!(%id, "Resolving request past its deadline");
                }
                let _ = entry.tx.send(outcome);
                true
            }
            None => {
                warn!(%id, "Received response for unknown request ID");
                false
            }
        }
    }

    /// Removes the entry for `id` without waking anyone.
    pub fn unregister(&self, id: &RequestId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Fails every outstanding waiter with [`Error::ConnectionClosed`].
    ///
    /// Returns the number of waiters cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, entry) in pending {
            let _ = entry.tx.send(Err(Error::connection_closed(reason)));
        }

        if count > 0 {
            debug!(count, reason, "Cancelled pending requests");
        }
        count
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_register_resolve_wait() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::from("a");
        let waiter = correlator.register(id.clone(), WAIT).expect("register");
        assert_eq!(waiter.id(), &id);
        assert!(correlator.contains(&id));

        assert!(correlator.resolve(&id, Ok(Response::new(id.clone(), json!({"ok": true})))));
        let response = correlator.wait(waiter).await.expect("reply");
        assert_eq!(response.result, json!({"ok": true}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let correlator = RequestCorrelator::new(8);
        let _waiter = correlator.register(RequestId::Number(1), WAIT).expect("register");
        let err = correlator
            .register(RequestId::Number(1), WAIT)
            .expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateId { .. }));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_admission_limit() {
        let correlator = RequestCorrelator::new(2);
        let _a = correlator.register(RequestId::Number(1), WAIT).expect("register");
        let _b = correlator.register(RequestId::Number(2), WAIT).expect("register");
        let err = correlator
            .register(RequestId::Number(3), WAIT)
            .expect_err("limit");
        assert!(matches!(err, Error::TooManyPending { pending: 2, max: 2 }));
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_noop() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::from("ghost");
        assert!(!correlator.resolve(&id, Ok(Response::new(id.clone(), json!(null)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::Number(42);
        let waiter = correlator
            .register(id.clone(), Duration::from_millis(100))
            .expect("register");

        let err = correlator.wait(waiter).await.expect_err("timeout");
        assert!(matches!(
            err,
            Error::RequestTimeout { timeout_ms: 100, .. }
        ));
        assert!(!correlator.contains(&id));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_everyone() {
        let correlator = Arc::new(RequestCorrelator::new(8));
        let mut handles = Vec::new();

        for n in 0..3 {
            let waiter = correlator.register(RequestId::Number(n), WAIT).expect("register");
            let correlator = Arc::clone(&correlator);
            handles.push(tokio::spawn(async move { correlator.wait(waiter).await }));
        }

        assert_eq!(correlator.cancel_all("disconnect"), 3);
        assert_eq!(correlator.pending_count(), 0);

        for handle in handles {
            let err = handle.await.expect("join").expect_err("cancelled");
            assert!(
                matches!(err, Error::ConnectionClosed { ref reason } if reason == "disconnect")
            );
        }
    }

    #[tokio::test]
    async fn test_error_outcome_is_delivered() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::from("e");
        let waiter = correlator.register(id.clone(), WAIT).expect("register");

        correlator.resolve(&id, Err(Error::method_not_found("x")));
        let err = correlator.wait(waiter).await.expect_err("error outcome");
        assert!(matches!(err, Error::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_is_at_most_once() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::from("once");
        let _waiter = correlator.register(id.clone(), WAIT).expect("register");

        assert!(correlator.resolve(&id, Ok(Response::new(id.clone(), json!(1)))));
        assert!(!correlator.resolve(&id, Ok(Response::new(id.clone(), json!(2)))));
    }

    #[tokio::test]
    async fn test_dropped_waiter_removes_entry() {
        let correlator = RequestCorrelator::new(1);
        let waiter = correlator.register(RequestId::Number(1), WAIT).expect("register");
        assert_eq!(correlator.pending_count(), 1);

        drop(waiter);
        assert_eq!(correlator.pending_count(), 0);
        assert!(correlator.register(RequestId::Number(2), WAIT).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_removes_entry() {
        let correlator = RequestCorrelator::new(8);
        for n in 0..3 {
            let waiter = correlator.register(RequestId::Number(n), WAIT).expect("register");
            let outer = tokio::time::timeout(Duration::from_millis(50), correlator.wait(waiter)).await;
            assert!(outer.is_err());
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_waiter_keeps_newer_registration() {
        let correlator = RequestCorrelator::new(8);
        let id = RequestId::from("reused");
        let stale = correlator.register(id.clone(), WAIT).expect("register");
        assert!(correlator.resolve(&id, Ok(Response::new(id.clone(), json!(1)))));

        let _fresh = correlator.register(id.clone(), WAIT).expect("re-register");
        drop(stale);
        assert!(correlator.contains(&id));
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let correlator = RequestCorrelator::new(8);
        let waiter = correlator
            .register(RequestId::Number(1), Duration::MAX)
            .expect("register");
        assert!(waiter.deadline() > Instant::now());

        correlator.resolve(&RequestId::Number(1), Ok(Response::new(RequestId::Number(1), json!(null))));
        assert!(correlator.wait(waiter).await.is_ok());
    }
}
