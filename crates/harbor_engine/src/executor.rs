//! Action execution interface.

use crate::action::PendingAction;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of replaying one action against the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The remote side applied the action.
    Success,
    /// Transient failure (network error, timeout, 5xx). The action stays
    /// queued and the cycle halts.
    RetryableFailure(String),
    /// Permanent rejection (validation error, conflict, 4xx). The action is
    /// dead-lettered.
    NonRetryableFailure(String),
}

impl ExecutionOutcome {
    /// Returns true for [`ExecutionOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// Replays a pending action against the remote side.
///
/// Implementations wrap an HTTP or RPC client. The action id should be sent
/// as an idempotency key.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executes the action and classifies the result.
    async fn execute(&self, action: &PendingAction) -> ExecutionOutcome;
}

#[async_trait]
impl<E: ActionExecutor + ?Sized> ActionExecutor for Arc<E> {
    async fn execute(&self, action: &PendingAction) -> ExecutionOutcome {
        (**self).execute(action).await
    }
}

/// A scripted executor for tests.
///
/// Outcomes are scripted per target and consumed in order; a target with no
/// script left gets the default outcome. Every call is recorded.
pub struct MockExecutor {
    scripts: Mutex<HashMap<String, VecDeque<ExecutionOutcome>>>,
    default_outcome: Mutex<ExecutionOutcome>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<PendingAction>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockExecutor {
    /// Creates an executor that succeeds for every action.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_outcome: Mutex::new(ExecutionOutcome::Success),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queues outcomes for the next executions against `target`.
    pub fn script(&self, target: &str, outcomes: impl IntoIterator<Item = ExecutionOutcome>) {
        self.scripts
            .lock()
            .entry(target.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Sets the outcome for targets without a script.
    pub fn set_default_outcome(&self, outcome: ExecutionOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    /// Makes every execution sleep before returning.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Actions executed so far, in call order.
    pub fn calls(&self) -> Vec<PendingAction> {
        self.calls.lock().clone()
    }

    /// Number of executions so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of executions that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, action: &PendingAction) -> ExecutionOutcome {
        self.calls.lock().push(action.clone());
        let _flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&action.target)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default_outcome.lock().clone())
    }
}

// Counts one execution in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
