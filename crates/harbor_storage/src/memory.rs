//! In-memory table for testing.

use crate::error::{StorageError, StorageResult};
use crate::table::Table;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory table.
///
/// This table keeps all pairs in a sorted map and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral engines that don't need persistence
///
/// Writes can be made to fail on demand with [`InMemoryTable::set_fail_writes`],
/// which is how the engine's storage-failure paths are exercised.
///
/// # Example
///
/// ```rust
/// use harbor_storage::{InMemoryTable, Table};
///
/// let table = InMemoryTable::new();
/// table.write("a", b"1").unwrap();
/// table.write("b", b"2").unwrap();
/// assert_eq!(table.scan_all().unwrap().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTable {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryTable {
    /// Creates a new empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with pre-existing pairs.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            data: RwLock::new(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `write` and `delete` fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the table holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        Ok(())
    }
}

impl Table for InMemoryTable {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.data.write().remove(key);
        Ok(())
    }

    fn scan_all(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
