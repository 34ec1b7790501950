//! Online/offline detection.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Current reachability of the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// The remote side is reachable.
    Online,
    /// The remote side is unreachable.
    Offline,
}

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityEvent {
    /// Offline to online.
    Connected,
    /// Online to offline.
    Disconnected,
}

const EVENT_CAPACITY: usize = 16;

/// Edge-triggered connectivity state machine.
///
/// Feed it raw reachability signals with [`observe`](Self::observe); it
/// publishes an event only when the state actually changes.
pub struct ConnectivityMonitor {
    state: RwLock<ConnectivityState>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the given initial state. No event is published
    /// for the initial state.
    pub fn new(online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(if online {
                ConnectivityState::Online
            } else {
                ConnectivityState::Offline
            }),
            events,
        }
    }

    /// Applies a reachability signal, returning the transition it caused.
    pub fn observe(&self, reachable: bool) -> Option<ConnectivityEvent> {
        let mut state = self.state.write();
        let event = match (*state, reachable) {
            (ConnectivityState::Offline, true) => {
                *state = ConnectivityState::Online;
                ConnectivityEvent::Connected
            }
            (ConnectivityState::Online, false) => {
                *state = ConnectivityState::Offline;
                ConnectivityEvent::Disconnected
            }
            _ => return None,
        };
        info!(?event, "connectivity changed");
        // No subscribers is fine
        let _ = self.events.send(event);
        Some(event)
    }

    /// Subscribes to future transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        *self.state.read()
    }

    /// Returns true while online.
    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    /// Spawns a task feeding `signal` into [`observe`](Self::observe).
    ///
    /// The current signal value is applied first. The task ends when the
    /// sending side of the signal is dropped.
    pub fn follow(self: &Arc<Self>, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let initial = *signal.borrow_and_update();
            monitor.observe(initial);
            while signal.changed().await.is_ok() {
                let reachable = *signal.borrow_and_update();
                monitor.observe(reachable);
            }
            debug!("connectivity signal closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_edges_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert_eq!(monitor.state(), ConnectivityState::Offline);

        assert_eq!(monitor.observe(false), None);
        assert_eq!(monitor.observe(true), Some(ConnectivityEvent::Connected));
        assert_eq!(monitor.observe(true), None);
        assert!(monitor.is_online());
        assert_eq!(monitor.observe(false), Some(ConnectivityEvent::Disconnected));
        assert!(!monitor.is_online());
    }

    #[test]
    fn subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.observe(true);
        monitor.observe(false);
        monitor.observe(true);

        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Disconnected);
        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn follow_tracks_signal() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let mut events = monitor.subscribe();
        let (tx, rx) = watch::channel(false);
        let task = monitor.follow(rx);

        tx.send(true).unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::Connected);
        assert!(monitor.is_online());

        tx.send(false).unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectivityEvent::Disconnected);

        drop(tx);
        task.await.unwrap();
        assert!(!monitor.is_online());
    }
}
