//! Durable FIFO queue of pending actions with a dead-letter set.

use crate::action::{ActionId, ActionKind, PendingAction};
use crate::clock::Clock;
use crate::codec::{self, dead_key, queue_key, DEAD_PREFIX, QUEUE_PREFIX};
use crate::error::{EngineError, EngineResult};
use harbor_storage::Table;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an action after a recorded failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// The action stays queued; `attempts` failures recorded so far.
    Retrying {
        /// Failed executions so far.
        attempts: u32,
    },
    /// The retry budget is spent and the action moved to the dead-letter set.
    DeadLettered(PendingAction),
}

#[derive(Debug, Default)]
struct QueueState {
    live: VecDeque<PendingAction>,
    dead: BTreeMap<u64, PendingAction>,
    next_sequence: u64,
}

impl QueueState {
    fn position(&self, id: &ActionId) -> Option<usize> {
        self.live.iter().position(|a| &a.id == id)
    }

    fn dead_sequence(&self, id: &ActionId) -> Option<u64> {
        self.dead
            .values()
            .find(|a| &a.id == id)
            .map(|a| a.sequence)
    }
}

/// Ordered queue of mutating actions awaiting replay.
///
/// Live actions are stored under `queue/<sequence>` and dead-lettered ones
/// under `dead/<sequence>`. All state sits behind one lock that is held
/// across the table writes of each operation.
pub struct ActionQueue<T: Table> {
    table: Arc<T>,
    clock: Arc<dyn Clock>,
    max_attempts: AtomicU32,
    state: Mutex<QueueState>,
}

impl<T: Table> ActionQueue<T> {
    /// Opens the queue, restoring live and dead-lettered actions in sequence
    /// order.
    ///
    /// An action present in both sets was interrupted while being
    /// dead-lettered; the dead record wins and the live key is removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` if the table cannot be scanned.
    pub fn open(table: Arc<T>, clock: Arc<dyn Clock>, max_attempts: u32) -> EngineResult<Self> {
        let mut state = QueueState {
            next_sequence: 1,
            ..QueueState::default()
        };

        let dead_records = table
            .scan_prefix(DEAD_PREFIX)
            .map_err(|e| EngineError::read_failed(DEAD_PREFIX, e))?;
        for (key, bytes) in dead_records {
            match codec::decode::<PendingAction>(&bytes) {
                Ok(action) => {
                    state.dead.insert(action.sequence, action);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable dead letter"),
            }
        }
        let dead_ids: HashSet<ActionId> = state.dead.values().map(|a| a.id.clone()).collect();

        let live_records = table
            .scan_prefix(QUEUE_PREFIX)
            .map_err(|e| EngineError::read_failed(QUEUE_PREFIX, e))?;
        let mut live = Vec::with_capacity(live_records.len());
        for (key, bytes) in live_records {
            let action = match codec::decode::<PendingAction>(&bytes) {
                Ok(action) => action,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable queued action");
                    continue;
                }
            };
            if dead_ids.contains(&action.id) {
                warn!(id = %action.id, "dropping live copy of dead-lettered action");
                if let Err(e) = table.delete(&key) {
                    warn!(key = %key, error = %e, "failed to remove stale queue record");
                }
                continue;
            }
            live.push(action);
        }
        live.sort_by_key(|a| a.sequence);

        let max_seen = live
            .iter()
            .map(|a| a.sequence)
            .chain(state.dead.keys().copied())
            .max();
        if let Some(max_seen) = max_seen {
            state.next_sequence = max_seen + 1;
        }
        state.live = live.into();

        if !state.live.is_empty() || !state.dead.is_empty() {
            info!(
                pending = state.live.len(),
                dead_letters = state.dead.len(),
                "restored action queue"
            );
        }

        Ok(Self {
            table,
            clock,
            max_attempts: AtomicU32::new(max_attempts),
            state: Mutex::new(state),
        })
    }

    /// Persists a new action and appends it to the tail.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the action could not be persisted;
    /// nothing is queued in that case.
    pub fn enqueue(
        &self,
        kind: ActionKind,
        target: impl Into<String>,
        payload: serde_json::Value,
    ) -> EngineResult<ActionId> {
        let mut state = self.state.lock();
        let action = PendingAction::new(
            state.next_sequence,
            kind,
            target,
            payload,
            self.clock.now(),
            self.max_attempts.load(Ordering::Relaxed),
        );
        self.persist_live(&action)?;

        state.next_sequence += 1;
        debug!(id = %action.id, sequence = action.sequence, kind = %action.kind, target = %action.target, "queued action");
        let id = action.id.clone();
        state.live.push_back(action);
        Ok(id)
    }

    /// Returns up to `limit` of the oldest live actions without removing them.
    pub fn peek_batch(&self, limit: usize) -> Vec<PendingAction> {
        self.state.lock().live.iter().take(limit).cloned().collect()
    }

    /// Removes a successfully replayed action.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` if no live action has this id, or
    /// `StorageWriteFailed` if the delete fails.
    pub fn mark_succeeded(&self, id: &ActionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let pos = state
            .position(id)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))?;

        let key = queue_key(state.live[pos].sequence);
        self.table
            .delete(&key)
            .map_err(|e| EngineError::write_failed(key, e))?;
        state.live.remove(pos);
        debug!(id = %id, "action completed");
        Ok(())
    }

    /// Records a retryable failure.
    ///
    /// Once `attempts` reaches `max_attempts` the action is dead-lettered.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` for an unknown id or `StorageWriteFailed` if
    /// the new state could not be persisted.
    pub fn mark_failed(
        &self,
        id: &ActionId,
        reason: impl Into<String>,
    ) -> EngineResult<FailureDisposition> {
        let mut state = self.state.lock();
        let pos = state
            .position(id)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))?;

        let mut action = state.live[pos].clone();
        action.attempts += 1;
        action.last_error = Some(reason.into());

        if action.is_exhausted() {
            self.dead_letter_locked(&mut state, pos, action.clone())?;
            return Ok(FailureDisposition::DeadLettered(action));
        }

        self.persist_live(&action)?;
        let attempts = action.attempts;
        state.live[pos] = action;
        debug!(id = %id, attempts, "action will be retried");
        Ok(FailureDisposition::Retrying { attempts })
    }

    /// Records a non-retryable rejection and dead-letters the action at once.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` for an unknown id or `StorageWriteFailed` if
    /// the dead-letter record could not be written.
    pub fn mark_rejected(
        &self,
        id: &ActionId,
        reason: impl Into<String>,
    ) -> EngineResult<PendingAction> {
        let mut state = self.state.lock();
        let pos = state
            .position(id)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))?;

        let mut action = state.live[pos].clone();
        action.attempts += 1;
        action.last_error = Some(reason.into());
        self.dead_letter_locked(&mut state, pos, action.clone())?;
        Ok(action)
    }

    // The dead record is the commit point. A live key left behind by a failed
    // delete is reconciled by `open`.
    fn dead_letter_locked(
        &self,
        state: &mut QueueState,
        pos: usize,
        action: PendingAction,
    ) -> EngineResult<()> {
        let dead = dead_key(action.sequence);
        let bytes = codec::encode(&action)?;
        self.table
            .write(&dead, &bytes)
            .map_err(|e| EngineError::write_failed(dead, e))?;

        let live = queue_key(action.sequence);
        if let Err(e) = self.table.delete(&live) {
            warn!(key = %live, error = %e, "failed to remove queue record after dead-lettering");
        }

        state.live.remove(pos);
        warn!(
            id = %action.id,
            target = %action.target,
            attempts = action.attempts,
            last_error = action.last_error.as_deref().unwrap_or(""),
            "action dead-lettered"
        );
        state.dead.insert(action.sequence, action);
        Ok(())
    }

    fn persist_live(&self, action: &PendingAction) -> EngineResult<()> {
        let key = queue_key(action.sequence);
        let bytes = codec::encode(action)?;
        self.table
            .write(&key, &bytes)
            .map_err(|e| EngineError::write_failed(key, e))
    }

    /// Dead-lettered actions in sequence order. These are never replayed
    /// automatically.
    pub fn dead_letters(&self) -> Vec<PendingAction> {
        self.state.lock().dead.values().cloned().collect()
    }

    /// Moves a dead-lettered action back to the live queue at its original
    /// position with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` if no dead letter has this id, or
    /// `StorageWriteFailed` if the move could not be persisted.
    pub fn requeue_dead_letter(&self, id: &ActionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let sequence = state
            .dead_sequence(id)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))?;
        let Some(mut action) = state.dead.get(&sequence).cloned() else {
            return Err(EngineError::ActionNotFound(id.clone()));
        };
        action.attempts = 0;
        action.last_error = None;
        action.max_attempts = self.max_attempts.load(Ordering::Relaxed);

        self.persist_live(&action)?;
        let dead = dead_key(sequence);
        if let Err(e) = self.table.delete(&dead) {
            // Dead wins on reopen; drop the live copy so memory agrees.
            let live = queue_key(sequence);
            if let Err(rollback) = self.table.delete(&live) {
                warn!(key = %live, error = %rollback, "failed to roll back requeued record");
            }
            return Err(EngineError::write_failed(dead, e));
        }

        state.dead.remove(&sequence);
        let pos = state.live.partition_point(|a| a.sequence < sequence);
        info!(id = %id, sequence, "requeued dead letter");
        state.live.insert(pos, action);
        Ok(())
    }

    /// Permanently drops a dead-lettered action.
    ///
    /// # Errors
    ///
    /// Returns `ActionNotFound` if no dead letter has this id, or
    /// `StorageWriteFailed` if the delete fails.
    pub fn discard_dead_letter(&self, id: &ActionId) -> EngineResult<PendingAction> {
        let mut state = self.state.lock();
        let sequence = state
            .dead_sequence(id)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))?;

        let key = dead_key(sequence);
        self.table
            .delete(&key)
            .map_err(|e| EngineError::write_failed(key, e))?;
        info!(id = %id, "discarded dead letter");
        state
            .dead
            .remove(&sequence)
            .ok_or_else(|| EngineError::ActionNotFound(id.clone()))
    }

    /// Drops every live and dead-lettered action.
    ///
    /// # Errors
    ///
    /// Stops at the first failed delete and returns `StorageWriteFailed`;
    /// actions removed before it stay removed.
    pub fn clear(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        while let Some(action) = state.live.front() {
            let key = queue_key(action.sequence);
            self.table
                .delete(&key)
                .map_err(|e| EngineError::write_failed(key, e))?;
            state.live.pop_front();
        }
        while let Some((&sequence, _)) = state.dead.first_key_value() {
            let key = dead_key(sequence);
            self.table
                .delete(&key)
                .map_err(|e| EngineError::write_failed(key, e))?;
            state.dead.remove(&sequence);
        }
        info!("cleared action queue");
        Ok(())
    }

    /// Looks up a live or dead-lettered action.
    pub fn get(&self, id: &ActionId) -> Option<PendingAction> {
        let state = self.state.lock();
        state
            .live
            .iter()
            .chain(state.dead.values())
            .find(|a| &a.id == id)
            .cloned()
    }

    /// Number of live actions.
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Returns true if no live actions are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// Number of dead-lettered actions.
    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().dead.len()
    }

    /// Retry budget given to actions enqueued from now on.
    pub fn set_max_attempts(&self, max_attempts: u32) {
        self.max_attempts.store(max_attempts, Ordering::Relaxed);
    }
}
