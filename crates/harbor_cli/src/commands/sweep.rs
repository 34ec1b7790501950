//! Sweep command implementation.

use super::{format_size, open_engine, open_table, print_json, CliResult, MaintenanceEngine};
use crate::Format;
use harbor_engine::{Clock, EngineConfig, EvictionPolicy, SystemClock, Timestamp};
use serde::Serialize;
use std::path::Path;

/// Sweep result.
#[derive(Debug, Serialize)]
pub struct SweepResult {
    /// Expired entries removed (or that would be removed).
    pub expired: usize,
    /// Keys evicted to fit the budget, oldest first.
    pub evicted: Vec<String>,
    /// Cache bytes before the sweep.
    pub bytes_before: u64,
    /// Cache bytes after the sweep.
    pub bytes_after: u64,
    /// Whether anything was actually removed.
    pub dry_run: bool,
}

/// Runs the sweep command.
pub fn run(path: &Path, config: &EngineConfig, dry_run: bool, format: Format) -> CliResult<()> {
    let table = open_table(path)?;
    let engine = open_engine(table, config)?;
    let policy = EvictionPolicy::new(config.max_total_bytes);

    let result = if dry_run {
        plan(&engine, &policy, SystemClock.now())
    } else {
        sweep(&engine, &policy)?
    };

    match format {
        Format::Json => print_json(&result)?,
        Format::Text => {
            if result.dry_run {
                println!("(dry run - no changes made)");
            }
            println!("Expired entries: {}", result.expired);
            println!("Evicted entries: {}", result.evicted.len());
            for key in &result.evicted {
                println!("  {}", key);
            }
            println!(
                "Cache size: {} -> {} (budget {})",
                format_size(result.bytes_before),
                format_size(result.bytes_after),
                format_size(policy.max_total_bytes())
            );
        }
    }
    Ok(())
}

fn sweep(engine: &MaintenanceEngine, policy: &EvictionPolicy) -> CliResult<SweepResult> {
    let cache = engine.cache();
    let bytes_before = cache.total_bytes();
    let expired = cache.sweep_expired()?;
    let evicted = cache.enforce_budget(policy)?;
    Ok(SweepResult {
        expired,
        evicted,
        bytes_before,
        bytes_after: cache.total_bytes(),
        dry_run: false,
    })
}

fn plan(engine: &MaintenanceEngine, policy: &EvictionPolicy, now: Timestamp) -> SweepResult {
    let cache = engine.cache();
    let (expired, live): (Vec<_>, Vec<_>) = cache
        .entries()
        .into_iter()
        .partition(|e| e.is_expired(now));
    let evicted = policy.select(&live);

    let bytes_after = live
        .iter()
        .filter(|e| !evicted.contains(&e.key))
        .map(|e| e.size_bytes)
        .sum();
    SweepResult {
        expired: expired.len(),
        evicted,
        bytes_before: cache.total_bytes(),
        bytes_after,
        dry_run: true,
    }
}
