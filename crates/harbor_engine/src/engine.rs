//! Engine facade wiring the cache, queue and sync controller together.

use crate::action::{ActionId, ActionKind};
use crate::cache::{CacheEntry, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::controller::SyncController;
use crate::error::EngineResult;
use crate::events::{EngineEvent, EventBus};
use crate::executor::ActionExecutor;
use crate::queue::ActionQueue;
use crate::status::{SyncReport, SyncStatus};
use harbor_storage::Table;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// An offline cache and action queue over one table.
///
/// Engines are plain values: several can coexist, e.g. one per account,
/// each with its own table, executor and connectivity signal.
///
/// # Example
///
/// ```rust,no_run
/// use harbor_engine::{ActionKind, Engine, EngineConfig, MockExecutor};
/// use harbor_storage::InMemoryTable;
/// use serde_json::json;
/// use std::sync::Arc;
/// use tokio::sync::watch;
///
/// # async fn example() -> harbor_engine::EngineResult<()> {
/// let (online, signal) = watch::channel(false);
/// let engine = Engine::open(
///     Arc::new(InMemoryTable::new()),
///     MockExecutor::new(),
///     signal,
///     EngineConfig::default(),
/// )?;
/// let handle = engine.start();
///
/// engine.put("pets:list", b"[]".to_vec(), None)?;
/// engine.enqueue(ActionKind::Create, "/pets", json!({"name": "Rex"}))?;
///
/// // Replays the queued action in the background
/// online.send_replace(true);
///
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Engine<T: Table, E: ActionExecutor> {
    controller: Arc<SyncController<T, E>>,
    events: EventBus,
    signal: watch::Receiver<bool>,
}

impl<T: Table, E: ActionExecutor> Engine<T, E> {
    /// Opens an engine using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad configuration or a storage error if
    /// the table cannot be loaded.
    pub fn open(
        table: Arc<T>,
        executor: E,
        signal: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::open_with_clock(table, executor, signal, config, Arc::new(SystemClock))
    }

    /// Opens an engine with an injected clock.
    ///
    /// # Errors
    ///
    /// As [`Engine::open`].
    pub fn open_with_clock(
        table: Arc<T>,
        executor: E,
        signal: watch::Receiver<bool>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let monitor = Arc::new(ConnectivityMonitor::new(*signal.borrow()));
        let events = EventBus::default();
        let controller = Arc::new(SyncController::new(
            table,
            executor,
            monitor,
            clock,
            events.clone(),
            config,
        )?);

        let status = controller.status();
        info!(
            online = status.is_online,
            pending = status.pending_count,
            dead_letters = status.dead_letter_count,
            cached = controller.cache().len(),
            "engine opened"
        );

        Ok(Self {
            controller,
            events,
            signal,
        })
    }

    /// Caches `payload` under `key`; see [`CacheStore::put`].
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the table write fails.
    pub fn put(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> EngineResult<u64> {
        self.cache().put(key, payload, ttl)
    }

    /// Caches `value` as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Codec` or `StorageWriteFailed`.
    pub fn put_json<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> EngineResult<u64> {
        self.cache().put_json(key, value, ttl)
    }

    /// Reads a live cache entry.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error if the entry cannot be loaded.
    pub fn get(&self, key: &str) -> EngineResult<Option<CacheEntry>> {
        self.cache().get(key)
    }

    /// Reads a live cache entry as JSON.
    ///
    /// # Errors
    ///
    /// Returns a storage or codec error if the entry cannot be loaded.
    pub fn get_json<V: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<V>> {
        self.cache().get_json(key)
    }

    /// Removes a cache entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the delete fails.
    pub fn remove(&self, key: &str) -> EngineResult<()> {
        self.cache().remove(key)
    }

    /// Queues a mutating action for replay.
    ///
    /// When online, the background loop is woken to replay it.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the action could not be persisted.
    pub fn enqueue(
        &self,
        kind: ActionKind,
        target: impl Into<String>,
        payload: serde_json::Value,
    ) -> EngineResult<ActionId> {
        let id = self.queue().enqueue(kind, target, payload)?;
        self.events.emit(EngineEvent::ActionQueued { id: id.clone() });
        self.controller.refresh_status();
        if self.monitor().is_online() {
            self.controller.request_sync();
        }
        Ok(id)
    }

    /// Runs one replay cycle now.
    ///
    /// # Errors
    ///
    /// See [`SyncController::sync`].
    pub async fn sync(&self) -> EngineResult<SyncReport> {
        self.controller.sync().await
    }

    /// Drops every queued action, every dead letter and every cache entry.
    ///
    /// Intended for sign-out; the engine never calls it on its own.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if a delete fails.
    pub fn logout(&self) -> EngineResult<()> {
        self.controller.cancel();
        self.queue().clear()?;
        self.cache().clear()?;
        self.controller.refresh_status();
        info!("engine state cleared");
        Ok(())
    }

    /// Replaces the configuration at runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn update_config(&self, config: EngineConfig) -> EngineResult<()> {
        self.controller.update_config(config)
    }

    /// The cache store.
    pub fn cache(&self) -> &Arc<CacheStore<T>> {
        self.controller.cache()
    }

    /// The action queue.
    pub fn queue(&self) -> &Arc<ActionQueue<T>> {
        self.controller.queue()
    }

    /// The sync controller.
    pub fn controller(&self) -> &Arc<SyncController<T, E>> {
        &self.controller
    }

    /// The connectivity monitor.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        self.controller.monitor()
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.controller.status()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl<T, E> Engine<T, E>
where
    T: Table + 'static,
    E: ActionExecutor + 'static,
{
    /// Starts following the connectivity signal and the background sync
    /// loop.
    pub fn start(&self) -> EngineHandle {
        let follower = self.monitor().follow(self.signal.clone());
        let (stop, shutdown) = oneshot::channel();
        let controller = self.controller.spawn(shutdown);
        EngineHandle {
            stop,
            controller,
            follower,
        }
    }
}

/// Background tasks started by [`Engine::start`].
#[must_use = "dropping the handle leaves the background tasks running"]
pub struct EngineHandle {
    stop: oneshot::Sender<()>,
    controller: JoinHandle<()>,
    follower: JoinHandle<()>,
}

impl EngineHandle {
    /// Stops the background tasks.
    ///
    /// A cycle already in progress runs to completion first; call
    /// [`SyncController::cancel`] beforehand to cut it short.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.controller.await {
            warn!(error = %e, "sync loop ended abnormally");
        }
        self.follower.abort();
        let _ = self.follower.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::executor::MockExecutor;
    use harbor_storage::InMemoryTable;
    use serde_json::json;

    fn engine(
        online: bool,
    ) -> (
        Engine<InMemoryTable, Arc<MockExecutor>>,
        Arc<MockExecutor>,
        watch::Sender<bool>,
    ) {
        let executor = Arc::new(MockExecutor::new());
        let (tx, rx) = watch::channel(online);
        let engine = Engine::open_with_clock(
            Arc::new(InMemoryTable::new()),
            Arc::clone(&executor),
            rx,
            EngineConfig::default(),
            Arc::new(ManualClock::new(5_000)),
        )
        .unwrap();
        (engine, executor, tx)
    }

    #[test]
    fn open_rejects_bad_config() {
        let (_tx, rx) = watch::channel(true);
        let result = Engine::open(
            Arc::new(InMemoryTable::new()),
            MockExecutor::new(),
            rx,
            EngineConfig::default().with_max_attempts(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn enqueue_emits_and_updates_status() {
        let (engine, _, _tx) = engine(false);
        let mut events = engine.subscribe();

        let id = engine
            .enqueue(ActionKind::Create, "/pets", json!({"name": "Rex"}))
            .unwrap();
        assert_eq!(engine.status().pending_count, 1);

        let mut queued = None;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ActionQueued { id } = event {
                queued = Some(id);
            }
        }
        assert_eq!(queued, Some(id));
    }

    #[test]
    fn cache_pass_through() {
        let (engine, _, _tx) = engine(false);
        assert_eq!(engine.put("pets:list", b"P1".to_vec(), None).unwrap(), 1);
        assert_eq!(engine.get("pets:list").unwrap().unwrap().payload, b"P1");

        engine.put_json("pets:count", &3, None).unwrap();
        assert_eq!(engine.get_json::<u32>("pets:count").unwrap(), Some(3));

        engine.remove("pets:list").unwrap();
        assert!(engine.get("pets:list").unwrap().is_none());
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let (engine, executor, _tx) = engine(true);
        engine.put("k", b"v".to_vec(), None).unwrap();
        engine.enqueue(ActionKind::Delete, "/a", json!(null)).unwrap();
        let bad = engine.enqueue(ActionKind::Delete, "/b", json!(null)).unwrap();
        engine.queue().mark_rejected(&bad, "gone").unwrap();

        engine.logout().unwrap();
        let status = engine.status();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.dead_letter_count, 0);
        assert!(engine.cache().is_empty());

        engine.sync().await.unwrap();
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn started_engine_replays_when_connected() {
        let (engine, executor, online) = engine(false);
        let handle = engine.start();
        let mut status = engine.controller().status_receiver();

        engine
            .enqueue(ActionKind::Update, "/pets/1", json!({"name": "Max"}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(executor.call_count(), 0);

        online.send(true).unwrap();
        while status.borrow_and_update().pending_count != 0 {
            status.changed().await.unwrap();
        }
        assert_eq!(executor.call_count(), 1);
        assert!(engine.status().is_online);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_while_online_wakes_loop() {
        let (engine, executor, _online) = engine(true);
        let handle = engine.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine
            .enqueue(ActionKind::Create, "/pets", json!({"name": "Rex"}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(executor.call_count(), 1);
        assert!(engine.queue().is_empty());

        handle.shutdown().await;
    }
}
