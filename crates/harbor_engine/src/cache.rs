//! Versioned key/value cache with TTL expiry.

use crate::clock::{duration_millis, Clock};
use crate::codec::{self, cache_key, version_key, CACHE_PREFIX, VERSION_PREFIX};
use crate::error::{EngineError, EngineResult};
use crate::eviction::EvictionPolicy;
use crate::Timestamp;
use harbor_storage::Table;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A cached value as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-chosen key, e.g. `"pets:list"`.
    pub key: String,
    /// Opaque payload.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// When this version was written.
    pub stored_at: Timestamp,
    /// When this entry stops being served, if ever.
    pub expires_at: Option<Timestamp>,
    /// Write counter for this key, starting at 1. Keeps counting across
    /// removal, expiry and eviction of the key.
    pub version: u64,
}

impl CacheEntry {
    /// Returns true once `now` is past `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        is_expired(self.expires_at, now)
    }

    /// Bytes this entry counts against the cache budget.
    pub fn size_bytes(&self) -> u64 {
        (self.key.len() + self.payload.len()) as u64
    }

    fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            key: self.key.clone(),
            size_bytes: self.size_bytes(),
            stored_at: self.stored_at,
            expires_at: self.expires_at,
            version: self.version,
        }
    }
}

/// Entry bookkeeping kept in memory; what the eviction policy sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    /// Cache key.
    pub key: String,
    /// Key plus payload length.
    pub size_bytes: u64,
    /// When the current version was written.
    pub stored_at: Timestamp,
    /// Expiry, if any.
    pub expires_at: Option<Timestamp>,
    /// Current version.
    pub version: u64,
}

impl EntryMetadata {
    /// Returns true once `now` is past `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        is_expired(self.expires_at, now)
    }
}

fn is_expired(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    expires_at.is_some_and(|at| now > at)
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The write was applied at this version.
    Stored(u64),
    /// A newer or equal version was already written; nothing was written.
    Stale {
        /// Highest version written so far.
        current: u64,
    },
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: BTreeMap<String, EntryMetadata>,
    /// Last version of keys removed since they were last written.
    retired: BTreeMap<String, u64>,
    total_bytes: u64,
}

impl CacheIndex {
    /// Highest version ever written for `key`, live or not.
    fn high_water(&self, key: &str) -> Option<u64> {
        let live = self.entries.get(key).map(|m| m.version);
        live.max(self.retired.get(key).copied())
    }

    fn insert(&mut self, meta: EntryMetadata) {
        self.total_bytes += meta.size_bytes;
        if let Some(old) = self.entries.insert(meta.key.clone(), meta) {
            self.total_bytes -= old.size_bytes;
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.total_bytes -= old.size_bytes;
            self.retired.insert(old.key, old.version);
        }
    }
}

/// Key/value cache over a persistent table.
///
/// Metadata for every entry is held in memory behind a single lock together
/// with the total-size counter; payloads stay in the table. Every mutation
/// writes the table first and updates the index only on success, so a
/// failed write leaves the previous entry and the counter untouched.
///
/// Removing an entry (explicitly, by expiry or by eviction) leaves a
/// `ver/<key>` record holding its last version, so a later write to the key
/// continues from there. Only [`CacheStore::clear`] resets versions.
pub struct CacheStore<T: Table> {
    table: Arc<T>,
    clock: Arc<dyn Clock>,
    index: Mutex<CacheIndex>,
    default_ttl: RwLock<Option<Duration>>,
}

impl<T: Table> CacheStore<T> {
    /// Opens the cache, rebuilding its index from the table.
    ///
    /// Records that fail to decode are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` if the table cannot be scanned.
    pub fn open(
        table: Arc<T>,
        clock: Arc<dyn Clock>,
        default_ttl: Option<Duration>,
    ) -> EngineResult<Self> {
        let records = table
            .scan_prefix(CACHE_PREFIX)
            .map_err(|e| EngineError::read_failed(CACHE_PREFIX, e))?;

        let mut index = CacheIndex::default();
        for (table_key, bytes) in records {
            match codec::decode::<CacheEntry>(&bytes) {
                Ok(entry) if cache_key(&entry.key) == table_key => index.insert(entry.metadata()),
                Ok(entry) => {
                    warn!(table_key = %table_key, key = %entry.key, "skipping cache record under wrong key")
                }
                Err(e) => warn!(table_key = %table_key, error = %e, "skipping undecodable cache record"),
            }
        }
        let retired = table
            .scan_prefix(VERSION_PREFIX)
            .map_err(|e| EngineError::read_failed(VERSION_PREFIX, e))?;
        for (table_key, bytes) in retired {
            let Some(key) = table_key.strip_prefix(VERSION_PREFIX) else {
                continue;
            };
            match codec::decode::<u64>(&bytes) {
                Ok(version) => {
                    index.retired.insert(key.to_string(), version);
                }
                Err(e) => warn!(table_key = %table_key, error = %e, "skipping undecodable version record"),
            }
        }

        if !index.entries.is_empty() {
            info!(
                entries = index.entries.len(),
                bytes = index.total_bytes,
                "restored cache index"
            );
        }

        Ok(Self {
            table,
            clock,
            index: Mutex::new(index),
            default_ttl: RwLock::new(default_ttl),
        })
    }

    /// Writes a new version of `key`.
    ///
    /// The version is one more than the highest version ever written for
    /// the key, or 1 for a key never written.
    /// `ttl` falls back to the configured default TTL.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the table write fails; the previous
    /// entry stays in place.
    pub fn put(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> EngineResult<u64> {
        let mut index = self.index.lock();
        let version = index.high_water(key).map_or(1, |v| v + 1);
        self.write_locked(&mut index, key, payload, ttl, version)?;
        Ok(version)
    }

    /// Writes `key` at a caller-supplied `version`, discarding the write if
    /// an equal or newer version was already written, even one since removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the table write fails.
    pub fn put_if_newer(
        &self,
        key: &str,
        payload: Vec<u8>,
        ttl: Option<Duration>,
        version: u64,
    ) -> EngineResult<PutOutcome> {
        let mut index = self.index.lock();
        if let Some(current) = index.high_water(key) {
            if current >= version {
                debug!(key, current, incoming = version, "discarding stale cache write");
                return Ok(PutOutcome::Stale { current });
            }
        }
        self.write_locked(&mut index, key, payload, ttl, version)?;
        Ok(PutOutcome::Stored(version))
    }

    /// Serializes `value` as JSON and stores it.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization fails, otherwise as [`Self::put`].
    pub fn put_json<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> EngineResult<u64> {
        let payload = serde_json::to_vec(value).map_err(|e| EngineError::Codec(e.to_string()))?;
        self.put(key, payload, ttl)
    }

    fn write_locked(
        &self,
        index: &mut CacheIndex,
        key: &str,
        payload: Vec<u8>,
        ttl: Option<Duration>,
        version: u64,
    ) -> EngineResult<()> {
        let now = self.clock.now();
        let ttl = ttl.or(*self.default_ttl.read());
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            stored_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(duration_millis(ttl))),
            version,
        };

        let table_key = cache_key(key);
        let bytes = codec::encode(&entry)?;
        self.table
            .write(&table_key, &bytes)
            .map_err(|e| EngineError::write_failed(table_key, e))?;

        index.insert(entry.metadata());
        if index.retired.remove(key).is_some() {
            let ver_key = version_key(key);
            if let Err(e) = self.table.delete(&ver_key) {
                // Superseded by the live entry; reopening takes the max
                warn!(key, error = %e, "failed to drop version record");
            }
        }
        debug!(key, version, size = entry.size_bytes(), "cached entry");
        Ok(())
    }

    /// Returns the live entry for `key`.
    ///
    /// Expired entries are reported as missing and removed on the way out.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` or `Codec` if the stored record cannot be
    /// loaded.
    pub fn get(&self, key: &str) -> EngineResult<Option<CacheEntry>> {
        let mut index = self.index.lock();
        let now = self.clock.now();
        let Some(expired) = index.entries.get(key).map(|m| m.is_expired(now)) else {
            return Ok(None);
        };

        if expired {
            if let Err(e) = self.delete_locked(&mut index, key) {
                warn!(key, error = %e, "failed to drop expired cache entry");
            }
            return Ok(None);
        }

        let table_key = cache_key(key);
        let bytes = self
            .table
            .read(&table_key)
            .map_err(|e| EngineError::read_failed(table_key.as_str(), e))?;
        match bytes {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => {
                warn!(key, "cache index referenced a missing record");
                index.remove(key);
                Ok(None)
            }
        }
    }

    /// Loads `key` and parses its payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the payload is not valid JSON for `V`.
    pub fn get_json<V: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<V>> {
        match self.get(key)? {
            Some(entry) => serde_json::from_slice(&entry.payload)
                .map(Some)
                .map_err(|e| EngineError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    /// Removes `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the table delete fails.
    pub fn remove(&self, key: &str) -> EngineResult<()> {
        let mut index = self.index.lock();
        if !index.entries.contains_key(key) {
            return Ok(());
        }
        self.delete_locked(&mut index, key)
    }

    fn delete_locked(&self, index: &mut CacheIndex, key: &str) -> EngineResult<()> {
        if let Some(version) = index.entries.get(key).map(|m| m.version) {
            let ver_key = version_key(key);
            let bytes = codec::encode(&version)?;
            self.table
                .write(&ver_key, &bytes)
                .map_err(|e| EngineError::write_failed(ver_key, e))?;
        }

        let table_key = cache_key(key);
        self.table
            .delete(&table_key)
            .map_err(|e| EngineError::write_failed(table_key, e))?;
        index.remove(key);
        Ok(())
    }

    /// Removes every expired entry and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Stops at the first failed delete and returns `StorageWriteFailed`;
    /// entries removed before it stay removed.
    pub fn sweep_expired(&self) -> EngineResult<usize> {
        let mut index = self.index.lock();
        let now = self.clock.now();
        let expired: Vec<String> = index
            .entries
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.key.clone())
            .collect();

        for key in &expired {
            self.delete_locked(&mut index, key)?;
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "swept expired cache entries");
        }
        Ok(expired.len())
    }

    /// Evicts entries chosen by `policy` until the cache fits its budget.
    ///
    /// Selection and removal happen under the same lock that `put` uses for
    /// the size counter. Returns the evicted keys in eviction order.
    ///
    /// # Errors
    ///
    /// Stops at the first failed delete and returns `StorageWriteFailed`.
    pub fn enforce_budget(&self, policy: &EvictionPolicy) -> EngineResult<Vec<String>> {
        let mut index = self.index.lock();
        if index.total_bytes <= policy.max_total_bytes() {
            return Ok(Vec::new());
        }

        let metadata: Vec<EntryMetadata> = index.entries.values().cloned().collect();
        let victims = policy.select(&metadata);
        for key in &victims {
            self.delete_locked(&mut index, key)?;
        }
        if !victims.is_empty() {
            info!(
                evicted = victims.len(),
                remaining_bytes = index.total_bytes,
                budget = policy.max_total_bytes(),
                "evicted cache entries over budget"
            );
        }
        Ok(victims)
    }

    /// Removes every entry and forgets every version, so the next write
    /// to any key starts again at 1.
    ///
    /// # Errors
    ///
    /// Stops at the first failed delete and returns `StorageWriteFailed`.
    pub fn clear(&self) -> EngineResult<()> {
        let mut index = self.index.lock();
        let keys: Vec<String> = index.entries.keys().cloned().collect();
        for key in &keys {
            let table_key = cache_key(key);
            self.table
                .delete(&table_key)
                .map_err(|e| EngineError::write_failed(table_key, e))?;
            index.remove(key);
        }

        let retired: Vec<String> = index.retired.keys().cloned().collect();
        for key in &retired {
            let ver_key = version_key(key);
            self.table
                .delete(&ver_key)
                .map_err(|e| EngineError::write_failed(ver_key, e))?;
            index.retired.remove(key);
        }
        Ok(())
    }

    /// Returns true if `key` has a live entry.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.index
            .lock()
            .entries
            .get(key)
            .is_some_and(|m| !m.is_expired(now))
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.lock().entries.is_empty()
    }

    /// Total bytes counted against the budget.
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    /// Snapshot of all entry metadata, sorted by key.
    pub fn entries(&self) -> Vec<EntryMetadata> {
        self.index.lock().entries.values().cloned().collect()
    }

    /// Replaces the TTL applied to writes without one.
    pub fn set_default_ttl(&self, ttl: Option<Duration>) {
        *self.default_ttl.write() = ttl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use harbor_storage::InMemoryTable;
    use proptest::prelude::*;
    use serde_json::json;

    const T0: Timestamp = 1_700_000_000_000;

    fn store_with(table: Arc<InMemoryTable>) -> (CacheStore<InMemoryTable>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = CacheStore::open(table, clock.clone(), None).unwrap();
        (store, clock)
    }

    fn store() -> (CacheStore<InMemoryTable>, Arc<ManualClock>) {
        store_with(Arc::new(InMemoryTable::new()))
    }

    #[test]
    fn put_then_get_returns_first_version() {
        let (cache, _) = store();
        let version = cache
            .put("pets:list", b"P1".to_vec(), Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(version, 1);

        let entry = cache.get("pets:list").unwrap().unwrap();
        assert_eq!(entry.payload, b"P1");
        assert_eq!(entry.version, 1);
        assert_eq!(entry.stored_at, T0);
        assert_eq!(entry.expires_at, Some(T0 + 60_000));
    }

    #[test]
    fn overwrite_increments_version() {
        let (cache, _) = store();
        cache.put("k", b"a".to_vec(), None).unwrap();
        cache.put("k", b"bb".to_vec(), None).unwrap();
        assert_eq!(cache.put("k", b"ccc".to_vec(), None).unwrap(), 3);

        let entry = cache.get("k").unwrap().unwrap();
        assert_eq!(entry.payload, b"ccc");
        assert_eq!(cache.total_bytes(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_reads_as_missing() {
        let (cache, clock) = store();
        cache.put("k", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();

        clock.advance(Duration::from_millis(1_000));
        assert!(cache.get("k").unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(cache.get("k").unwrap().is_none());
        assert!(!cache.contains("k"));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let clock = Arc::new(ManualClock::new(T0));
        let cache = CacheStore::open(
            Arc::new(InMemoryTable::new()),
            clock,
            Some(Duration::from_secs(10)),
        )
        .unwrap();
        cache.put("k", b"v".to_vec(), None).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().expires_at, Some(T0 + 10_000));

        cache.set_default_ttl(None);
        cache.put("k", b"v".to_vec(), None).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().expires_at, None);
    }

    #[test]
    fn remove_is_idempotent() {
        let (cache, _) = store();
        cache.put("k", b"v".to_vec(), None).unwrap();
        cache.remove("k").unwrap();
        cache.remove("k").unwrap();
        cache.remove("never").unwrap();
        assert!(cache.get("k").unwrap().is_none());
    }

    #[test]
    fn failed_write_keeps_previous_entry() {
        let table = Arc::new(InMemoryTable::new());
        let (cache, _) = store_with(table.clone());
        cache.put("k", b"old".to_vec(), None).unwrap();

        table.set_fail_writes(true);
        let err = cache.put("k", b"newer".to_vec(), None).unwrap_err();
        assert!(matches!(err, EngineError::StorageWriteFailed { .. }));

        table.set_fail_writes(false);
        let entry = cache.get("k").unwrap().unwrap();
        assert_eq!(entry.payload, b"old");
        assert_eq!(entry.version, 1);
        assert_eq!(cache.total_bytes(), 4);
        assert_eq!(cache.put("k", b"new".to_vec(), None).unwrap(), 2);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (cache, clock) = store();
        cache.put("short", b"1".to_vec(), Some(Duration::from_secs(1))).unwrap();
        cache.put("long", b"2".to_vec(), Some(Duration::from_secs(100))).unwrap();
        cache.put("forever", b"3".to_vec(), None).unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("long"));
        assert!(cache.contains("forever"));
        assert_eq!(cache.sweep_expired().unwrap(), 0);
    }

    #[test]
    fn stale_versions_are_discarded() {
        let (cache, _) = store();
        assert_eq!(
            cache.put_if_newer("k", b"v5".to_vec(), None, 5).unwrap(),
            PutOutcome::Stored(5)
        );
        assert_eq!(
            cache.put_if_newer("k", b"v4".to_vec(), None, 4).unwrap(),
            PutOutcome::Stale { current: 5 }
        );
        assert_eq!(
            cache.put_if_newer("k", b"v5b".to_vec(), None, 5).unwrap(),
            PutOutcome::Stale { current: 5 }
        );
        assert_eq!(cache.get("k").unwrap().unwrap().payload, b"v5");
        assert_eq!(cache.put("k", b"v6".to_vec(), None).unwrap(), 6);
    }

    #[test]
    fn enforce_budget_evicts_oldest() {
        let (cache, clock) = store();
        // Each entry is a 1-byte key plus a 49-byte payload
        for key in ["a", "b", "c"] {
            cache.put(key, vec![0; 49], None).unwrap();
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(cache.total_bytes(), 150);

        let evicted = cache.enforce_budget(&EvictionPolicy::new(100)).unwrap();
        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(cache.total_bytes(), 100);
        assert!(cache.get("a").unwrap().is_none());
        assert!(cache.get("b").unwrap().is_some());

        assert!(cache.enforce_budget(&EvictionPolicy::new(100)).unwrap().is_empty());
    }

    #[test]
    fn json_helpers() {
        let (cache, _) = store();
        cache.put_json("pets:list", &json!([{"id": 1}]), None).unwrap();
        let value: serde_json::Value = cache.get_json("pets:list").unwrap().unwrap();
        assert_eq!(value, json!([{"id": 1}]));

        cache.put("raw", b"not json".to_vec(), None).unwrap();
        assert!(matches!(
            cache.get_json::<serde_json::Value>("raw"),
            Err(EngineError::Codec(_))
        ));
    }

    #[test]
    fn reopen_restores_index() {
        let table = Arc::new(InMemoryTable::new());
        {
            let (cache, _) = store_with(table.clone());
            cache.put("a", b"123".to_vec(), None).unwrap();
            cache.put("a", b"1234".to_vec(), None).unwrap();
            cache.put("b", b"1".to_vec(), None).unwrap();
        }
        table.write("cache/broken", b"\xff\xff").unwrap();

        let (cache, _) = store_with(table);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_bytes(), 5 + 2);
        assert_eq!(cache.put("a", b"x".to_vec(), None).unwrap(), 3);
    }

    #[test]
    fn clear_removes_everything() {
        let table = Arc::new(InMemoryTable::new());
        let (cache, _) = store_with(table.clone());
        cache.put("a", b"1".to_vec(), None).unwrap();
        cache.put("a", b"2".to_vec(), None).unwrap();
        cache.put("b", b"2".to_vec(), None).unwrap();
        cache.remove("a").unwrap();
        table.write("queue/00000000000000000001", b"q").unwrap();

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(cache.put("a", b"fresh".to_vec(), None).unwrap(), 1);
    }

    #[test]
    fn eviction_does_not_reset_versions() {
        let (cache, clock) = store();
        // 1-byte key plus 59-byte payload
        cache.put("k", vec![1; 59], None).unwrap();
        cache.put("k", vec![2; 59], None).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.put("other", vec![3; 55], None).unwrap();

        let evicted = cache.enforce_budget(&EvictionPolicy::new(100)).unwrap();
        assert_eq!(evicted, vec!["k".to_string()]);
        assert!(cache.get("k").unwrap().is_none());

        assert_eq!(
            cache.put_if_newer("k", b"old".to_vec(), None, 2).unwrap(),
            PutOutcome::Stale { current: 2 }
        );
        assert_eq!(cache.put("k", b"v3".to_vec(), None).unwrap(), 3);
        assert_eq!(
            cache.put_if_newer("k", b"old".to_vec(), None, 2).unwrap(),
            PutOutcome::Stale { current: 3 }
        );
        assert_eq!(cache.get("k").unwrap().unwrap().version, 3);
    }

    #[test]
    fn removal_and_expiry_keep_counting() {
        let (cache, clock) = store();
        cache.put("k", b"a".to_vec(), None).unwrap();
        cache.remove("k").unwrap();
        assert_eq!(cache.put("k", b"b".to_vec(), Some(Duration::from_secs(1))).unwrap(), 2);

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("k").unwrap().is_none());
        assert_eq!(cache.put("k", b"c".to_vec(), Some(Duration::from_secs(1))).unwrap(), 3);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert_eq!(cache.put("k", b"d".to_vec(), None).unwrap(), 4);
    }

    #[test]
    fn retired_versions_survive_reopen() {
        let table = Arc::new(InMemoryTable::new());
        {
            let (cache, _) = store_with(table.clone());
            cache.put("k", b"a".to_vec(), None).unwrap();
            cache.put("k", b"b".to_vec(), None).unwrap();
            cache.remove("k").unwrap();
        }
        assert!(table.read("ver/k").unwrap().is_some());

        let (cache, _) = store_with(table.clone());
        assert!(cache.is_empty());
        assert_eq!(cache.put("k", b"c".to_vec(), None).unwrap(), 3);
        assert!(table.read("ver/k").unwrap().is_none());
    }

    #[test]
    fn failed_retire_keeps_entry() {
        let table = Arc::new(InMemoryTable::new());
        let (cache, _) = store_with(table.clone());
        cache.put("k", b"v".to_vec(), None).unwrap();

        table.set_fail_writes(true);
        assert!(cache.remove("k").is_err());
        table.set_fail_writes(false);

        assert_eq!(cache.get("k").unwrap().unwrap().version, 1);
        assert_eq!(cache.total_bytes(), 2);
    }

    #[test]
    fn huge_ttl_never_expires_early() {
        let (cache, clock) = store();
        cache.put("k", b"v".to_vec(), Some(Duration::MAX)).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().expires_at, Some(u64::MAX));

        clock.advance(Duration::from_secs(86_400 * 365));
        assert!(cache.get("k").unwrap().is_some());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(usize, usize),
        Remove(usize),
        Expire,
        Evict(u64),
        Reopen,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0usize..4, 0usize..16).prop_map(|(k, len)| Op::Put(k, len)),
            1 => (0usize..4).prop_map(Op::Remove),
            1 => Just(Op::Expire),
            1 => (0u64..40).prop_map(Op::Evict),
            1 => Just(Op::Reopen),
        ]
    }

    proptest! {
        #[test]
        fn version_counts_successful_puts(ops in prop::collection::vec(arb_op(), 1..64)) {
            let table = Arc::new(InMemoryTable::new());
            let clock = Arc::new(ManualClock::new(T0));
            let mut cache = CacheStore::open(table.clone(), clock.clone(), None).unwrap();
            let keys = ["a", "b", "c", "d"];
            let mut expected = [0u64; 4];

            for op in ops {
                match op {
                    Op::Put(k, len) => {
                        // Odd lengths get a short TTL so expiry has something to hit
                        let ttl = (len % 2 == 1).then_some(Duration::from_secs(5));
                        let version = cache.put(keys[k], vec![1; len], ttl).unwrap();
                        expected[k] += 1;
                        prop_assert_eq!(version, expected[k]);
                    }
                    Op::Remove(k) => cache.remove(keys[k]).unwrap(),
                    Op::Expire => {
                        clock.advance(Duration::from_secs(6));
                        cache.sweep_expired().unwrap();
                    }
                    Op::Evict(budget) => {
                        cache.enforce_budget(&EvictionPolicy::new(budget)).unwrap();
                    }
                    Op::Reopen => {
                        cache = CacheStore::open(table.clone(), clock.clone(), None).unwrap();
                    }
                }
                clock.advance(Duration::from_millis(1));
            }

            for (k, key) in keys.iter().enumerate() {
                if let Some(entry) = cache.get(key).unwrap() {
                    prop_assert_eq!(entry.version, expected[k]);
                }
            }
        }
    }
}
