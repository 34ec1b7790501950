//! # Harbor Engine
//!
//! Offline data cache and action queue with connectivity-aware replay.
//!
//! This crate provides:
//! - A versioned key/value cache with TTL expiry and a size budget
//! - A durable FIFO queue of mutating actions with a dead-letter set
//! - Edge-triggered connectivity detection
//! - A sync controller that replays queued actions with retry and backoff
//! - An [`Engine`] facade wiring all of the above over one [`harbor_storage::Table`]
//!
//! ## Architecture
//!
//! Reads are served from the cache; writes are queued and replayed once the
//! remote side is reachable:
//! 1. The caller enqueues an action while online or offline
//! 2. On reconnect, on a timer, or on request, the controller replays the
//!    queue oldest first
//! 3. After each cycle, expired cache entries are swept and the cache is
//!    trimmed to its budget
//!
//! ## Key Invariants
//!
//! - The remote side is authoritative; nothing is merged locally
//! - Actions replay in enqueue order and a retryable failure halts the cycle
//! - At most one replay cycle runs per engine
//! - Dead-lettered actions are never replayed without an explicit requeue
//! - Cache versions never regress

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod cache;
mod clock;
mod codec;
mod config;
mod connectivity;
mod controller;
mod engine;
mod error;
mod events;
mod eviction;
mod executor;
mod queue;
mod status;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

pub use action::{ActionId, ActionKind, PendingAction};
pub use cache::{CacheEntry, CacheStore, EntryMetadata, PutOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivityState};
pub use controller::SyncController;
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
pub use eviction::EvictionPolicy;
pub use executor::{ActionExecutor, ExecutionOutcome, MockExecutor};
pub use queue::{ActionQueue, FailureDisposition};
pub use status::{SkipReason, SyncReport, SyncStatus};
