//! Record encoding and table key layout.
//!
//! The cache, queue and controller share one table, partitioned by prefix:
//!
//! | prefix | contents |
//! |---|---|
//! | `cache/<key>` | [`crate::CacheEntry`] |
//! | `ver/<key>` | last version of a removed cache entry |
//! | `queue/<sequence>` | live [`crate::PendingAction`] |
//! | `dead/<sequence>` | dead-lettered [`crate::PendingAction`] |
//! | `meta/sync_state` | persisted controller state |
//!
//! Sequences are zero-padded so a sorted scan yields enqueue order. Values
//! are CBOR.

use crate::error::{EngineError, EngineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) const CACHE_PREFIX: &str = "cache/";
pub(crate) const VERSION_PREFIX: &str = "ver/";
pub(crate) const QUEUE_PREFIX: &str = "queue/";
pub(crate) const DEAD_PREFIX: &str = "dead/";
pub(crate) const SYNC_STATE_KEY: &str = "meta/sync_state";

pub(crate) fn cache_key(key: &str) -> String {
    format!("{CACHE_PREFIX}{key}")
}

pub(crate) fn version_key(key: &str) -> String {
    format!("{VERSION_PREFIX}{key}")
}

pub(crate) fn queue_key(sequence: u64) -> String {
    format!("{QUEUE_PREFIX}{sequence:020}")
}

pub(crate) fn dead_key(sequence: u64) -> String {
    format!("{DEAD_PREFIX}{sequence:020}")
}

pub(crate) fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| EngineError::Codec(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    ciborium::from_reader(bytes).map_err(|e| EngineError::Codec(e.to_string()))
}
