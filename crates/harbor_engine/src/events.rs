//! Engine events.

use crate::action::{ActionId, PendingAction};
use crate::connectivity::ConnectivityEvent;
use crate::status::{SyncReport, SyncStatus};
use tokio::sync::broadcast;

/// Something observable happened inside the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The sync status snapshot changed.
    StatusChanged(SyncStatus),
    /// An action was moved to the dead-letter set and needs a decision.
    ActionDeadLettered(PendingAction),
    /// A cache entry was evicted to fit the size budget.
    CacheEvicted {
        /// The evicted key.
        key: String,
    },
    /// An action was enqueued.
    ActionQueued {
        /// The new action's id.
        id: ActionId,
    },
    /// A replay cycle started.
    SyncStarted,
    /// A replay cycle finished.
    SyncCompleted(SyncReport),
    /// Connectivity changed.
    Connectivity(ConnectivityEvent),
}

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel for [`EngineEvent`]s.
///
/// Slow subscribers lose the oldest events rather than blocking the engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
