//! Compact command implementation.

use super::{format_size, open_table, print_json, CliResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug, Serialize)]
pub struct CompactStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Bytes reclaimed.
    pub reclaimed: u64,
    /// Live keys carried over.
    pub keys: usize,
}

/// Runs the compact command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let table = open_table(path)?;
    let bytes_before = table.log_size();
    let reclaimed = table.compact()?;
    let stats = CompactStats {
        bytes_before,
        bytes_after: table.log_size(),
        reclaimed,
        keys: table.len(),
    };

    match format {
        Format::Json => print_json(&stats)?,
        Format::Text => {
            println!("Compacted {:?}", path);
            println!("  Keys:        {}", stats.keys);
            println!("  Size before: {}", format_size(stats.bytes_before));
            println!("  Size after:  {}", format_size(stats.bytes_after));
            println!(
                "  Space saved: {} ({:.1}%)",
                format_size(stats.reclaimed),
                if stats.bytes_before > 0 {
                    stats.reclaimed as f64 / stats.bytes_before as f64 * 100.0
                } else {
                    0.0
                }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_storage::{FileTable, Table};
    use tempfile::tempdir;

    #[test]
    fn compaction_keeps_live_keys() {
        let dir = tempdir().unwrap();
        {
            let table = FileTable::open(dir.path()).unwrap();
            for i in 0..20 {
                table.write("cache/k", format!("v{i}").as_bytes()).unwrap();
            }
            table.write("queue/00000000000000000001", b"a").unwrap();
        }

        run(dir.path(), Format::Json).unwrap();

        let table = FileTable::open(dir.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.read("cache/k").unwrap(), Some(b"v19".to_vec()));
        assert_eq!(table.garbage_ratio(), 0.0);
    }
}
