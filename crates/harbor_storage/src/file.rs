//! Log-structured file table for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::record::{Decoded, LogRecord};
use crate::table::Table;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the log file inside the table directory.
const LOG_FILE: &str = "harbor.tbl";
/// Temporary file used while compacting.
const COMPACT_FILE: &str = "harbor.tbl.compact";
/// Advisory lock for single-writer access.
const LOCK_FILE: &str = "LOCK";

/// Logs smaller than this are never compacted automatically.
const AUTO_COMPACT_MIN_BYTES: u64 = 1024 * 1024;
/// Dead-byte share above which a write triggers compaction.
const AUTO_COMPACT_RATIO: f64 = 0.5;

/// A persistent table backed by an append-only log file.
///
/// Every `write` and `delete` appends one checksummed record and syncs it
/// before the in-memory index is updated, so a failed write leaves the
/// previous value in place. On open the log is replayed; a torn or corrupt
/// tail left by a crash is truncated back to the last good record.
///
/// ```text
/// <dir>/
/// ├─ LOCK          # Advisory lock for single-writer
/// └─ harbor.tbl    # Append-only record log
/// ```
///
/// # Example
///
/// ```no_run
/// use harbor_storage::{FileTable, Table};
/// use std::path::Path;
///
/// let table = FileTable::open(Path::new("offline-data")).unwrap();
/// table.write("meta/sync_state", b"{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileTable {
    dir: PathBuf,
    inner: RwLock<Inner>,
    _lock_file: File,
}

#[derive(Debug)]
struct Inner {
    file: File,
    index: BTreeMap<String, Vec<u8>>,
    /// Current log length in bytes.
    size: u64,
    /// Encoded bytes of the records that produced the current index.
    live_bytes: u64,
}

impl FileTable {
    /// Opens or creates a table in `dir`, replaying the existing log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created or the log opened
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur during replay
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOG_FILE))?;

        let (index, size, live_bytes) = replay(&mut file)?;
        info!(
            path = %dir.display(),
            keys = index.len(),
            bytes = size,
            "opened file table"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: RwLock::new(Inner {
                file,
                index,
                size,
                live_bytes,
            }),
            _lock_file: lock_file,
        })
    }

    /// Returns true if `dir` holds a table log.
    #[must_use]
    pub fn exists(dir: &Path) -> bool {
        dir.join(LOG_FILE).is_file()
    }

    /// Returns the table directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Returns true if the table holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Returns the current log size in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.inner.read().size
    }

    /// Returns the share of the log occupied by superseded records.
    #[must_use]
    pub fn garbage_ratio(&self) -> f64 {
        let inner = self.inner.read();
        if inner.size == 0 {
            return 0.0;
        }
        1.0 - inner.live_bytes as f64 / inner.size as f64
    }

    /// Rewrites the log so it only contains live records.
    ///
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted log cannot be written or renamed.
    /// The original log is left untouched in that case.
    pub fn compact(&self) -> StorageResult<u64> {
        let mut inner = self.inner.write();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> StorageResult<u64> {
        let tmp_path = self.dir.join(COMPACT_FILE);
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut written = 0u64;
        for (key, value) in &inner.index {
            let encoded = LogRecord::Put {
                key: key.clone(),
                value: value.clone(),
            }
            .encode()?;
            tmp.write_all(&encoded)?;
            written += encoded.len() as u64;
        }
        tmp.flush()?;
        tmp.sync_all()?;

        fs::rename(&tmp_path, self.dir.join(LOG_FILE))?;
        self.sync_directory()?;

        let reclaimed = inner.size.saturating_sub(written);
        inner.file = tmp;
        inner.size = written;
        inner.live_bytes = written;
        info!(reclaimed, size = written, "compacted file table");
        Ok(reclaimed)
    }

    /// Makes the rename of the compacted log durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    // NTFS journals directory metadata; there is no directory handle to sync
    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }

    fn append(&self, inner: &mut Inner, record: &LogRecord) -> StorageResult<u64> {
        let encoded = record.encode()?;
        let start = inner.size;

        let result = (|| -> std::io::Result<()> {
            inner.file.seek(SeekFrom::Start(start))?;
            inner.file.write_all(&encoded)?;
            inner.file.flush()?;
            inner.file.sync_data()
        })();

        if let Err(e) = result {
            // Drop any partially written bytes so the next replay stays clean
            if let Err(truncate_err) = inner.file.set_len(start) {
                warn!(error = %truncate_err, "failed to roll back partial table append");
            }
            return Err(e.into());
        }

        inner.size += encoded.len() as u64;
        Ok(encoded.len() as u64)
    }

    fn maybe_compact(&self, inner: &mut Inner) {
        if inner.size < AUTO_COMPACT_MIN_BYTES {
            return;
        }
        let garbage = 1.0 - inner.live_bytes as f64 / inner.size as f64;
        if garbage > AUTO_COMPACT_RATIO {
            if let Err(e) = self.compact_locked(inner) {
                warn!(error = %e, "automatic compaction failed");
            }
        }
    }
}

/// Replays the log into an index, truncating an unreadable tail.
fn replay(file: &mut File) -> StorageResult<(BTreeMap<String, Vec<u8>>, u64, u64)> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;

    let mut index: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut record_sizes: BTreeMap<String, u64> = BTreeMap::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        match LogRecord::decode(&buf[pos..], pos as u64) {
            Ok(Decoded::Record(record, len)) => {
                match record {
                    LogRecord::Put { key, value } => {
                        record_sizes.insert(key.clone(), len as u64);
                        index.insert(key, value);
                    }
                    LogRecord::Delete { key } => {
                        record_sizes.remove(&key);
                        index.remove(&key);
                    }
                }
                pos += len;
            }
            Ok(Decoded::Incomplete) => {
                warn!(offset = pos, discarded = buf.len() - pos, "truncating torn table tail");
                break;
            }
            Err(e) => {
                warn!(offset = pos, discarded = buf.len() - pos, error = %e, "truncating corrupt table tail");
                break;
            }
        }
    }

    if pos < buf.len() {
        file.set_len(pos as u64)?;
        file.sync_all()?;
    }

    let live_bytes = record_sizes.values().sum();
    Ok((index, pos as u64, live_bytes))
}

impl Table for FileTable {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.read().index.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let record = LogRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        };
        let len = self.append(&mut inner, &record)?;

        let previous = inner.index.insert(key.to_string(), value.to_vec());
        if let Some(previous) = previous {
            inner.live_bytes -= encoded_put_len(key, &previous);
        }
        inner.live_bytes += len;
        self.maybe_compact(&mut inner);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if !inner.index.contains_key(key) {
            return Ok(());
        }
        self.append(
            &mut inner,
            &LogRecord::Delete {
                key: key.to_string(),
            },
        )?;
        if let Some(previous) = inner.index.remove(key) {
            inner.live_bytes -= encoded_put_len(key, &previous);
        }
        self.maybe_compact(&mut inner);
        Ok(())
    }

    fn scan_all(&self) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .inner
            .read()
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

fn encoded_put_len(key: &str, value: &[u8]) -> u64 {
    (crate::record::HEADER_SIZE + key.len() + value.len() + crate::record::CRC_SIZE) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.log_size(), 0);
        assert!(FileTable::exists(dir.path()));
        assert_eq!(table.path(), dir.path());
        assert!(table.is_empty());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let table = FileTable::open(dir.path()).unwrap();

        table.write("a", b"hello").unwrap();
        table.write("b", b"world").unwrap();
        assert_eq!(table.read("a").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(table.read("c").unwrap(), None);
        assert_eq!(table.scan_all().unwrap().len(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let table = FileTable::open(dir.path()).unwrap();
            table.write("queue/01", b"first").unwrap();
            table.write("queue/02", b"second").unwrap();
            table.write("queue/01", b"first-v2").unwrap();
            table.delete("queue/02").unwrap();
        }

        {
            let table = FileTable::open(dir.path()).unwrap();
            assert_eq!(table.read("queue/01").unwrap(), Some(b"first-v2".to_vec()));
            assert_eq!(table.read("queue/02").unwrap(), None);
        }
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _table = FileTable::open(dir.path()).unwrap();
        assert!(matches!(
            FileTable::open(dir.path()),
            Err(StorageError::Locked)
        ));
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let good_size;
        {
            let table = FileTable::open(dir.path()).unwrap();
            table.write("k1", b"v1").unwrap();
            good_size = table.log_size();
        }

        // Simulate a crash halfway through appending a second record
        {
            let partial = LogRecord::Put {
                key: "k2".into(),
                value: vec![0xAB; 64],
            }
            .encode()
            .unwrap();
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(LOG_FILE))
                .unwrap();
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.log_size(), good_size);
        assert_eq!(table.read("k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(table.read("k2").unwrap(), None);

        // The truncated log keeps accepting writes
        table.write("k2", b"v2").unwrap();
        drop(table);
        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.read("k2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn file_corrupt_tail_is_truncated() {
        let dir = tempdir().unwrap();
        {
            let table = FileTable::open(dir.path()).unwrap();
            table.write("k1", b"v1").unwrap();
            table.write("k2", b"v2").unwrap();
        }

        // Flip the last checksum byte
        let path = dir.path().join(LOG_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.read("k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(table.read("k2").unwrap(), None);
    }

    #[test]
    fn file_compact_reclaims_space() {
        let dir = tempdir().unwrap();
        let table = FileTable::open(dir.path()).unwrap();

        for i in 0..20u8 {
            table.write("hot", &[i; 16]).unwrap();
        }
        table.write("cold", b"keep").unwrap();
        table.write("gone", b"x").unwrap();
        table.delete("gone").unwrap();
        assert!(table.garbage_ratio() > 0.5);

        let before = table.log_size();
        let reclaimed = table.compact().unwrap();
        assert_eq!(table.log_size(), before - reclaimed);
        assert!(table.garbage_ratio().abs() < f64::EPSILON);
        assert!(!dir.path().join(COMPACT_FILE).exists());

        // Appends land in the compacted log
        table.write("late", b"after").unwrap();

        drop(table);
        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.read("hot").unwrap(), Some(vec![19; 16]));
        assert_eq!(table.read("cold").unwrap(), Some(b"keep".to_vec()));
        assert_eq!(table.read("gone").unwrap(), None);
        assert_eq!(table.read("late").unwrap(), Some(b"after".to_vec()));
    }

    #[test]
    fn file_delete_missing_writes_nothing() {
        let dir = tempdir().unwrap();
        let table = FileTable::open(dir.path()).unwrap();
        table.delete("never-written").unwrap();
        assert_eq!(table.log_size(), 0);
    }
}
