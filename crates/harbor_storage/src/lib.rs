//! # Harbor Storage
//!
//! Persistent table abstraction and backends for Harbor.
//!
//! This crate provides the lowest-level storage layer used by the offline
//! cache and action queue. A table is a flat, key-addressable map of
//! **opaque byte values**; it does not interpret what it stores.
//!
//! ## Design Principles
//!
//! - Four primitives only: `read`, `write`, `delete`, `scan_all`
//! - Each `write`/`delete` is atomic per key (replace-or-keep)
//! - Must be `Send + Sync` for concurrent access
//! - Harbor owns all record format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryTable`] - For testing and ephemeral engines
//! - [`FileTable`] - Log-structured, crash-safe persistent table
//!
//! ## Example
//!
//! ```rust
//! use harbor_storage::{InMemoryTable, Table};
//!
//! let table = InMemoryTable::new();
//! table.write("pets:list", b"[]").unwrap();
//! assert_eq!(table.read("pets:list").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod table;

pub use error::{StorageError, StorageResult};
pub use file::FileTable;
pub use memory::InMemoryTable;
pub use record::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
pub use table::Table;
