//! Sync status snapshots and cycle reports.

use crate::Timestamp;
use serde::Serialize;
use std::time::Duration;

/// Observable state of the sync controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Whether the remote side is reachable.
    pub is_online: bool,
    /// Whether a replay cycle is running.
    pub is_syncing: bool,
    /// When the last cycle finished.
    pub last_sync_at: Option<Timestamp>,
    /// Live actions awaiting replay.
    pub pending_count: usize,
    /// Dead-lettered actions awaiting a decision.
    pub dead_letter_count: usize,
    /// Share of the current cycle processed, in `[0, 1]`.
    pub progress_fraction: f64,
}

impl SyncStatus {
    /// Status while no cycle is running.
    pub fn idle(
        is_online: bool,
        last_sync_at: Option<Timestamp>,
        pending_count: usize,
        dead_letter_count: usize,
    ) -> Self {
        Self {
            is_online,
            is_syncing: false,
            last_sync_at,
            pending_count,
            dead_letter_count,
            progress_fraction: if pending_count == 0 { 1.0 } else { 0.0 },
        }
    }

    pub(crate) fn with_progress(mut self, processed: usize, planned: usize) -> Self {
        self.is_syncing = true;
        self.progress_fraction = if planned == 0 {
            1.0
        } else {
            (processed as f64 / planned as f64).clamp(0.0, 1.0)
        };
        self
    }
}

/// Why a sync request did not run a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The monitor reported offline.
    Offline,
    /// Another cycle was in progress.
    AlreadySyncing,
}

/// Summary of one replay cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Set when no cycle ran.
    pub skipped: Option<SkipReason>,
    /// Live actions when the cycle started.
    pub planned: usize,
    /// Actions confirmed by the remote side.
    pub succeeded: usize,
    /// Actions that failed retryably and stay queued.
    pub retried: usize,
    /// Actions moved to the dead-letter set.
    pub dead_lettered: usize,
    /// Whether the cycle stopped before draining the queue.
    pub halted: bool,
    /// Whether the cycle was cancelled.
    pub cancelled: bool,
    /// Expired cache entries removed after replay.
    pub swept: usize,
    /// Cache keys evicted to fit the budget.
    pub evicted: Vec<String>,
    /// Delay before the next attempt after a retryable failure.
    pub retry_after: Option<Duration>,
}

impl SyncReport {
    /// A report for a request that did not run.
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    /// Returns true if no cycle ran.
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Actions that reached a final or retry decision in this cycle.
    pub fn processed(&self) -> usize {
        self.succeeded + self.retried + self.dead_lettered
    }
}
