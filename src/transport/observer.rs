//! Typed observers for transport events.
//!
//! Subscribers register with [`Observers::subscribe`] and receive every
//! [`TransportEvent`] until removed with [`Observers::unsubscribe`].
//! Callbacks run synchronously on the emitting task and must not block.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::identifiers::{SessionId, SubscriptionId};
use crate::protocol::Message;

// ============================================================================
// TransportEvent
// ============================================================================

/// Something observable happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An inbound session was accepted.
    SessionOpened {
        /// New session.
        session_id: SessionId,
    },
    /// An inbound session was removed from the registry.
    SessionClosed {
        /// Closed session.
        session_id: SessionId,
    },
    /// The external connection completed its handshake.
    ExternalConnected {
        /// Peer URL.
        url: String,
    },
    /// The external connection went away.
    ExternalDisconnected,
    /// The external peer sent something that matched no pending request.
    Unsolicited {
        /// Decoded frame.
        message: Message,
    },
}

// ============================================================================
// TransportObserver
// ============================================================================

/// Receiver of [`TransportEvent`]s.
pub trait TransportObserver: Send + Sync {
    /// Called once per event.
    fn on_event(&self, event: &TransportEvent);
}

impl<F> TransportObserver for F
where
    F: Fn(&TransportEvent) + Send + Sync,
{
    fn on_event(&self, event: &TransportEvent) {
        self(event);
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Registry of subscribed observers.
#[derive(Default)]
pub struct Observers {
    subscribers: RwLock<FxHashMap<SubscriptionId, Arc<dyn TransportObserver>>>,
}

impl Observers {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and returns its handle.
    pub fn subscribe(&self, observer: Arc<dyn TransportObserver>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.subscribers.write().insert(id, observer);
        trace!(subscription = %id, "Observer subscribed");
        id
    }

    /// Removes an observer. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Returns the number of registered observers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns `true` if nobody is subscribed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Delivers an event to every subscriber.
    pub fn emit(&self, event: &TransportEvent) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let subscribers: Vec<_> = self.subscribers.read().values().cloned().collect();
        for subscriber in subscribers {
            subscriber.on_event(event);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let observers = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = observers.subscribe(Arc::new(move |event: &TransportEvent| {
            sink.lock().push(event.clone());
        }));
        assert_eq!(observers.len(), 1);

        observers.emit(&TransportEvent::ExternalDisconnected);
        assert_eq!(seen.lock().as_slice(), [TransportEvent::ExternalDisconnected]);

        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        assert!(observers.is_empty());

        observers.emit(&TransportEvent::ExternalDisconnected);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_every_subscriber_receives_event() {
        let observers = Observers::new();
        let count = Arc::new(Mutex::new(0usize));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            observers.subscribe(Arc::new(move |_: &TransportEvent| {
                *count.lock() += 1;
            }));
        }

        let session_id = SessionId::generate();
        observers.emit(&TransportEvent::SessionOpened { session_id });
        assert_eq!(*count.lock(), 3);
    }
}
