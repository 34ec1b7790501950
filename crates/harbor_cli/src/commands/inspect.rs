//! Inspect command implementation.

use super::{format_size, open_engine, open_table, print_json, CliResult, MaintenanceEngine};
use crate::Format;
use harbor_engine::{Clock, EngineConfig, EntryMetadata, SystemClock, Timestamp};
use harbor_storage::FileTable;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Engine directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Engine directory.
    pub path: String,
    /// Table log size in bytes.
    pub log_size: u64,
    /// Share of the log held by superseded records.
    pub garbage_ratio: f64,
    /// Live table keys.
    pub table_keys: usize,
    /// Cache entries, including expired ones not yet swept.
    pub cache_entries: usize,
    /// Cache entries past their expiry.
    pub expired_entries: usize,
    /// Bytes counted against the cache budget.
    pub cache_bytes: u64,
    /// Configured cache budget.
    pub cache_budget: u64,
    /// Live queued actions.
    pub pending_actions: usize,
    /// Dead-lettered actions.
    pub dead_letters: usize,
    /// When the last sync cycle finished.
    pub last_sync_at: Option<Timestamp>,
    /// Cache entries (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EntryMetadata>>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    config: &EngineConfig,
    show_entries: bool,
    format: Format,
) -> CliResult<()> {
    let table = open_table(path)?;
    let engine = open_engine(Arc::clone(&table), config)?;
    let result = collect(&table, &engine, config, show_entries, SystemClock.now());

    match format {
        Format::Json => print_json(&result)?,
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn collect(
    table: &FileTable,
    engine: &MaintenanceEngine,
    config: &EngineConfig,
    show_entries: bool,
    now: Timestamp,
) -> InspectResult {
    let status = engine.status();
    let entries = engine.cache().entries();

    InspectResult {
        path: table.path().display().to_string(),
        log_size: table.log_size(),
        garbage_ratio: table.garbage_ratio(),
        table_keys: table.len(),
        cache_entries: entries.len(),
        expired_entries: entries.iter().filter(|e| e.is_expired(now)).count(),
        cache_bytes: engine.cache().total_bytes(),
        cache_budget: config.max_total_bytes,
        pending_actions: status.pending_count,
        dead_letters: status.dead_letter_count,
        last_sync_at: status.last_sync_at,
        entries: show_entries.then_some(entries),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Harbor Engine Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Table:");
    println!("  Log size:   {}", format_size(result.log_size));
    println!("  Garbage:    {:.1}%", result.garbage_ratio * 100.0);
    println!("  Keys:       {}", result.table_keys);
    println!();
    println!("Cache:");
    println!("  Entries:    {}", result.cache_entries);
    println!("  Expired:    {}", result.expired_entries);
    println!(
        "  Size:       {} of {}",
        format_size(result.cache_bytes),
        format_size(result.cache_budget)
    );
    println!();
    println!("Queue:");
    println!("  Pending:      {}", result.pending_actions);
    println!("  Dead letters: {}", result.dead_letters);
    match result.last_sync_at {
        Some(at) => println!("  Last sync:    {} ms since epoch", at),
        None => println!("  Last sync:    never"),
    }

    if let Some(entries) = &result.entries {
        println!();
        println!("Entries:");
        for entry in entries {
            println!(
                "  {} v{} {} stored {}{}",
                entry.key,
                entry.version,
                format_size(entry.size_bytes),
                entry.stored_at,
                entry
                    .expires_at
                    .map(|at| format!(", expires {}", at))
                    .unwrap_or_default()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_engine::ActionKind;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn collects_cache_and_queue_counts() {
        let dir = tempdir().unwrap();
        let table = Arc::new(FileTable::open(dir.path()).unwrap());
        let config = EngineConfig::default().with_max_total_bytes(1_000);
        let engine = open_engine(Arc::clone(&table), &config).unwrap();

        engine
            .put("pets:list", b"[1,2]".to_vec(), Some(Duration::from_secs(1)))
            .unwrap();
        engine.put("pets:1", b"{}".to_vec(), None).unwrap();
        engine
            .enqueue(ActionKind::Update, "/pets/1", json!({"name": "Max"}))
            .unwrap();

        let far_future = SystemClock.now() + 3_600_000;
        let result = collect(&table, &engine, &config, true, far_future);
        assert_eq!(result.cache_entries, 2);
        assert_eq!(result.expired_entries, 1);
        assert_eq!(result.cache_bytes, 14 + 8);
        assert_eq!(result.cache_budget, 1_000);
        assert_eq!(result.pending_actions, 1);
        assert_eq!(result.table_keys, 3);
        assert_eq!(result.entries.unwrap().len(), 2);
        assert_eq!(result.last_sync_at, None);
    }
}
