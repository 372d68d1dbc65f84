//! Broadcast bus for distributing `FlowSignal` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the engine can emit signals unconditionally.

use ordino_types::event::FlowSignal;
use tokio::sync::broadcast;

/// Multi-consumer bus for flow lifecycle signals.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct SignalBus {
    sender: broadcast::Sender<FlowSignal>,
}

impl SignalBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future signals.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowSignal> {
        self.sender.subscribe()
    }

    /// Publish a signal to all current subscribers.
    ///
    /// If there are no subscribers, the signal is silently dropped.
    pub fn publish(&self, signal: FlowSignal) {
        let _ = self.sender.send(signal);
    }

    /// Access the underlying broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<FlowSignal> {
        &self.sender
    }
}

impl Clone for SignalBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
