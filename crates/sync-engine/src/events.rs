//! Event bus pushing state updates to consumers.
//!
//! The manager publishes named events carrying owned, serializable snapshots;
//! nothing mutates a snapshot after publication. Delivery order is guaranteed
//! per context (each context's transitions are produced by one serialized
//! loop); no ordering is guaranteed across contexts.

use crate::manager::ContextGeneralState;
use crate::registry::connectivity::ContextConnectivity;
use serde::Serialize;
use tokio::sync::broadcast;

/// A state-change notification published by the manager.
#[derive(Debug, Clone, Serialize)]
pub enum SyncEvent {
    /// A context's aggregated general state was recomputed.
    GeneralStateChanged {
        /// Context name
        context: String,
        /// The new aggregate snapshot
        state: ContextGeneralState,
    },
    /// A context's connectivity record changed.
    ConnectivityChanged {
        /// Context name
        context: String,
        /// The new connectivity snapshot
        connectivity: ContextConnectivity,
    },
}

/// Broadcast channel fanning out [`SyncEvent`]s to any number of subscribers.
///
/// Slow subscribers lag and drop old events rather than blocking publication.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A bus with no subscribers drops it silently.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
