//! Sync controller: replays queued actions when online.

use crate::action::{ActionId, PendingAction};
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::codec::{self, SYNC_STATE_KEY};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::eviction::EvictionPolicy;
use crate::executor::{ActionExecutor, ExecutionOutcome};
use crate::queue::{ActionQueue, FailureDisposition};
use crate::status::{SkipReason, SyncReport, SyncStatus};
use crate::Timestamp;
use harbor_storage::Table;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Controller state kept across restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    last_sync_at: Option<Timestamp>,
}

/// Clears the syncing flag and republishes the idle status on every exit
/// path, including a dropped `sync` future.
struct CycleGuard<'a, T: Table, E: ActionExecutor> {
    controller: &'a SyncController<T, E>,
}

impl<T: Table, E: ActionExecutor> Drop for CycleGuard<'_, T, E> {
    fn drop(&mut self) {
        self.controller.syncing.store(false, Ordering::SeqCst);
        self.controller.refresh_status();
    }
}

/// How one action's replay ended.
enum Step {
    Continue,
    Halt,
}

/// Orchestrates replay of the action queue and cache maintenance.
///
/// At most one cycle runs at a time. Actions are replayed strictly in
/// enqueue order; a retryable failure stops the cycle so later actions
/// never overtake an earlier one.
pub struct SyncController<T: Table, E: ActionExecutor> {
    table: Arc<T>,
    cache: Arc<CacheStore<T>>,
    queue: Arc<ActionQueue<T>>,
    monitor: Arc<ConnectivityMonitor>,
    executor: E,
    events: EventBus,
    config: RwLock<EngineConfig>,
    syncing: AtomicBool,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    wake: Notify,
    last_sync_at: RwLock<Option<Timestamp>>,
    retry_at: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<SyncStatus>,
}

impl<T: Table, E: ActionExecutor> SyncController<T, E> {
    /// Opens the cache and queue on `table` and restores the last sync time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad configuration, or a storage error
    /// if the persisted state cannot be loaded.
    pub fn new(
        table: Arc<T>,
        executor: E,
        monitor: Arc<ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;

        let cache = Arc::new(CacheStore::open(
            Arc::clone(&table),
            Arc::clone(&clock),
            config.default_ttl,
        )?);
        let queue = Arc::new(ActionQueue::open(
            Arc::clone(&table),
            Arc::clone(&clock),
            config.max_attempts,
        )?);

        let persisted = match table
            .read(SYNC_STATE_KEY)
            .map_err(|e| EngineError::read_failed(SYNC_STATE_KEY, e))?
        {
            Some(bytes) => codec::decode::<PersistedState>(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring undecodable sync state");
                PersistedState::default()
            }),
            None => PersistedState::default(),
        };

        let initial = SyncStatus::idle(
            monitor.is_online(),
            persisted.last_sync_at,
            queue.len(),
            queue.dead_letter_count(),
        );
        let (status, _) = watch::channel(initial);

        Ok(Self {
            table,
            cache,
            queue,
            monitor,
            executor,
            events,
            config: RwLock::new(config),
            syncing: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            wake: Notify::new(),
            last_sync_at: RwLock::new(persisted.last_sync_at),
            retry_at: Mutex::new(None),
            clock,
            status,
        })
    }

    /// The cache this controller maintains.
    pub fn cache(&self) -> &Arc<CacheStore<T>> {
        &self.cache
    }

    /// The queue this controller replays.
    pub fn queue(&self) -> &Arc<ActionQueue<T>> {
        &self.queue
    }

    /// The connectivity monitor gating replay.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// A copy of the active configuration.
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration at runtime.
    ///
    /// The new retry budget applies to actions enqueued afterwards; the new
    /// default TTL to later cache writes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` and keeps the old configuration if `config`
    /// fails validation.
    pub fn update_config(&self, config: EngineConfig) -> EngineResult<()> {
        config.validate()?;
        self.cache.set_default_ttl(config.default_ttl);
        self.queue.set_max_attempts(config.max_attempts);
        *self.config.write() = config;
        info!("configuration updated");
        Ok(())
    }

    /// Returns true while a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        if self.is_syncing() {
            self.status.borrow().clone()
        } else {
            self.idle_status()
        }
    }

    /// Watches status snapshots as they are published.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// When the last cycle finished.
    pub fn last_sync_at(&self) -> Option<Timestamp> {
        *self.last_sync_at.read()
    }

    /// Cancels the running cycle, if any.
    ///
    /// The in-flight action is recorded as a retryable failure.
    pub fn cancel(&self) {
        if self.is_syncing() {
            info!("cancelling sync cycle");
            self.cancelled.store(true, Ordering::SeqCst);
            self.cancel_notify.notify_waiters();
        }
    }

    /// Asks the background loop to run a cycle soon.
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Recomputes the idle status and publishes it.
    ///
    /// Does nothing while a cycle is running; the cycle publishes its own
    /// progress.
    pub fn refresh_status(&self) {
        if !self.is_syncing() {
            self.publish(self.idle_status());
        }
    }

    fn idle_status(&self) -> SyncStatus {
        SyncStatus::idle(
            self.monitor.is_online(),
            self.last_sync_at(),
            self.queue.len(),
            self.queue.dead_letter_count(),
        )
    }

    fn publish(&self, status: SyncStatus) {
        self.status.send_replace(status.clone());
        self.events.emit(EngineEvent::StatusChanged(status));
    }

    fn publish_progress(&self, processed: usize, planned: usize) {
        self.publish(self.idle_status().with_progress(processed, planned));
    }

    /// Runs one replay cycle.
    ///
    /// Returns a skipped report without touching the executor when offline
    /// or when another cycle is running.
    ///
    /// # Errors
    ///
    /// Returns the storage error if an action's outcome could not be
    /// recorded. The cycle halts there so the action is not replayed twice
    /// within it; cache maintenance still runs.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> EngineResult<SyncReport> {
        if !self.monitor.is_online() {
            debug!("offline, skipping sync");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress");
            return Ok(SyncReport::skipped(SkipReason::AlreadySyncing));
        }
        let guard = CycleGuard { controller: self };
        self.cancelled.store(false, Ordering::SeqCst);

        let config = self.config();
        let mut report = SyncReport {
            planned: self.queue.len(),
            ..SyncReport::default()
        };
        self.publish_progress(0, report.planned);
        self.events.emit(EngineEvent::SyncStarted);
        info!(planned = report.planned, "sync started");

        let replayed = self.replay(&config, &mut report).await;
        if let Err(e) = &replayed {
            report.halted = true;
            error!(error = %e, "failed to record action outcome, halting cycle");
        }

        self.maintain_cache(&config, &mut report);
        self.record_completion();
        *self.retry_at.lock() = report.retry_after.map(|delay| Instant::now() + delay);

        drop(guard);
        info!(
            succeeded = report.succeeded,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            halted = report.halted,
            swept = report.swept,
            evicted = report.evicted.len(),
            "sync completed"
        );
        self.events.emit(EngineEvent::SyncCompleted(report.clone()));

        replayed.map(|()| report)
    }

    async fn replay(&self, config: &EngineConfig, report: &mut SyncReport) -> EngineResult<()> {
        let mut seen: HashSet<ActionId> = HashSet::new();
        loop {
            let batch = self.queue.peek_batch(config.batch_size);
            if batch.is_empty() {
                return Ok(());
            }

            for action in batch {
                if self.cancelled.load(Ordering::SeqCst) {
                    report.cancelled = true;
                    report.halted = true;
                    return Ok(());
                }
                if !seen.insert(action.id.clone()) {
                    warn!(id = %action.id, "action replayed twice in one cycle, halting");
                    report.halted = true;
                    return Ok(());
                }

                if let Step::Halt = self.replay_one(&action, config, report).await? {
                    report.halted = true;
                    report.cancelled = self.cancelled.load(Ordering::SeqCst);
                    return Ok(());
                }
                self.publish_progress(report.processed(), report.planned);
            }
        }
    }

    async fn replay_one(
        &self,
        action: &PendingAction,
        config: &EngineConfig,
        report: &mut SyncReport,
    ) -> EngineResult<Step> {
        match self.execute(action, config.action_timeout).await {
            ExecutionOutcome::Success => {
                self.queue.mark_succeeded(&action.id)?;
                report.succeeded += 1;
                debug!(id = %action.id, target = %action.target, "action replayed");
                Ok(Step::Continue)
            }
            ExecutionOutcome::RetryableFailure(reason) => {
                warn!(id = %action.id, target = %action.target, reason = %reason, "retryable failure");
                match self.queue.mark_failed(&action.id, reason)? {
                    FailureDisposition::Retrying { attempts } => {
                        report.retried += 1;
                        if !self.cancelled.load(Ordering::SeqCst) {
                            let delay = config.delay_for_attempts(action.attempts);
                            debug!(id = %action.id, attempts, ?delay, "backing off");
                            report.retry_after = Some(delay);
                        }
                    }
                    FailureDisposition::DeadLettered(dead) => {
                        report.dead_lettered += 1;
                        self.events.emit(EngineEvent::ActionDeadLettered(dead));
                    }
                }
                Ok(Step::Halt)
            }
            ExecutionOutcome::NonRetryableFailure(reason) => {
                warn!(id = %action.id, target = %action.target, reason = %reason, "action rejected");
                let dead = self.queue.mark_rejected(&action.id, reason)?;
                report.dead_lettered += 1;
                self.events.emit(EngineEvent::ActionDeadLettered(dead));
                Ok(Step::Continue)
            }
        }
    }

    async fn execute(&self, action: &PendingAction, timeout: Duration) -> ExecutionOutcome {
        let cancelled = self.cancel_notify.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();
        if self.cancelled.load(Ordering::SeqCst) {
            return ExecutionOutcome::RetryableFailure("cancelled".into());
        }

        tokio::select! {
            result = tokio::time::timeout(timeout, self.executor.execute(action)) => {
                result.unwrap_or_else(|_| {
                    ExecutionOutcome::RetryableFailure(format!("timed out after {timeout:?}"))
                })
            }
            _ = &mut cancelled => {
                self.cancelled.store(true, Ordering::SeqCst);
                ExecutionOutcome::RetryableFailure("cancelled".into())
            }
        }
    }

    fn maintain_cache(&self, config: &EngineConfig, report: &mut SyncReport) {
        match self.cache.sweep_expired() {
            Ok(swept) => report.swept = swept,
            Err(e) => warn!(error = %e, "cache sweep failed"),
        }

        match self
            .cache
            .enforce_budget(&EvictionPolicy::new(config.max_total_bytes))
        {
            Ok(evicted) => {
                for key in &evicted {
                    self.events
                        .emit(EngineEvent::CacheEvicted { key: key.clone() });
                }
                report.evicted = evicted;
            }
            Err(e) => warn!(error = %e, "cache eviction failed"),
        }
    }

    fn record_completion(&self) {
        let now = self.clock.now();
        *self.last_sync_at.write() = Some(now);

        let state = PersistedState {
            last_sync_at: Some(now),
        };
        let persisted = codec::encode(&state).and_then(|bytes| {
            self.table
                .write(SYNC_STATE_KEY, &bytes)
                .map_err(|e| EngineError::write_failed(SYNC_STATE_KEY, e))
        });
        if let Err(e) = persisted {
            warn!(error = %e, "failed to persist sync state");
        }
    }

    async fn sync_logged(&self) {
        if let Err(e) = self.sync().await {
            error!(error = %e, "sync cycle failed");
        }
    }

    fn backing_off(&self) -> bool {
        self.retry_at.lock().is_some_and(|at| at > Instant::now())
    }

    /// Runs the background loop until `shutdown` fires or its sender is
    /// dropped.
    ///
    /// Syncs on reconnect, on the periodic interval when something is
    /// pending, when a backoff delay elapses, and on [`request_sync`].
    ///
    /// [`request_sync`]: Self::request_sync
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut connectivity = self.monitor.subscribe();
        let mut period = self.config.read().sync_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?period, "sync loop running");

        if self.monitor.is_online() && !self.queue.is_empty() {
            self.sync_logged().await;
        }

        loop {
            let configured = self.config.read().sync_interval;
            if configured != period {
                period = configured;
                interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }

            let retry_at = *self.retry_at.lock();
            let backoff = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                event = connectivity.recv() => match event {
                    Ok(event) => {
                        self.events.emit(EngineEvent::Connectivity(event));
                        self.refresh_status();
                        if event == ConnectivityEvent::Connected {
                            *self.retry_at.lock() = None;
                            self.sync_logged().await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "connectivity events lagged");
                        self.refresh_status();
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = interval.tick() => {
                    if self.monitor.is_online() && !self.queue.is_empty() && !self.backing_off() {
                        self.sync_logged().await;
                    }
                }
                _ = backoff => {
                    *self.retry_at.lock() = None;
                    self.sync_logged().await;
                }
                _ = self.wake.notified() => {
                    if !self.backing_off() {
                        self.sync_logged().await;
                    }
                }
            }
        }
        info!("sync loop stopped");
    }
}

impl<T, E> SyncController<T, E>
where
    T: Table + 'static,
    E: ActionExecutor + 'static,
{
    /// Spawns [`run`](Self::run) on the tokio runtime.
    pub fn spawn(self: &Arc<Self>, shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.run(shutdown).await })
    }
}
