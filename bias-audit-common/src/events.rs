//! Event bus for wizard notifications
//!
//! A thin wrapper over `tokio::sync::broadcast`. The bus is generic over the
//! event type so the wizard crate can carry its own snapshots without this
//! crate depending on the session model.
//!
//! # Examples
//!
//! ```
//! use bias_audit_common::events::EventBus;
//!
//! let bus: EventBus<String> = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit_lossy("stage entered".to_string());
//! assert_eq!(rx.try_recv().unwrap(), "stage entered");
//! ```

use tokio::sync::broadcast;

/// Broadcast event bus
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
    capacity: usize,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<E: Clone> EventBus<E> {
    /// Bus buffering up to `capacity` events per receiver before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Send to every receiver; fails when nobody is subscribed
    pub fn emit(&self, event: E) -> Result<usize, broadcast::error::SendError<E>> {
        self.tx.send(event)
    }

    /// Send, dropping the event when nobody is subscribed
    pub fn emit_lossy(&self, event: E) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
