//! Table trait definition.

use crate::error::StorageResult;

/// A key-addressable persistent table.
///
/// Tables are **opaque byte stores** keyed by UTF-8 strings. Harbor layers
/// its cache entries, pending actions, and engine metadata on top of a single
/// table using key prefixes; the table itself knows nothing about them.
///
/// # Invariants
///
/// - `write` either fully replaces the value for `key` or leaves the previous
///   value untouched when it returns an error
/// - `delete` of a missing key succeeds
/// - `scan_all` returns every live pair, sorted by key
/// - Tables must be `Send + Sync`; implementations lock internally
///
/// # Implementors
///
/// - [`super::InMemoryTable`] - For testing
/// - [`super::FileTable`] - For persistent storage
pub trait Table: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be made durable. The previous
    /// value is kept in that case.
    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Deletes `key`. Deleting a missing key is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion could not be made durable.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Returns all key/value pairs, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn scan_all(&self) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Returns all pairs whose key starts with `prefix`, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying scan fails.
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .scan_all()?
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }
}

impl<T: Table + ?Sized> Table for std::sync::Arc<T> {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn scan_all(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        (**self).scan_all()
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }
}
