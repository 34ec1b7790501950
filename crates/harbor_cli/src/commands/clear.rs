//! Clear command implementation.

use super::{open_engine, open_table, print_json, CliResult};
use crate::Format;
use harbor_engine::EngineConfig;
use serde::Serialize;
use std::path::Path;

/// What to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Cache entries only.
    Cache,
    /// Queued and dead-lettered actions only.
    Queue,
    /// Everything, as on sign-out.
    All,
}

/// Clear result.
#[derive(Debug, Serialize)]
pub struct ClearResult {
    /// What was cleared.
    pub scope: Scope,
    /// Cache entries removed.
    pub cache_entries: usize,
    /// Live actions removed.
    pub pending_actions: usize,
    /// Dead letters removed.
    pub dead_letters: usize,
}

/// Runs the clear command.
pub fn run(path: &Path, config: &EngineConfig, scope: Scope, format: Format) -> CliResult<()> {
    let table = open_table(path)?;
    let engine = open_engine(table, config)?;
    let cache = engine.cache();
    let queue = engine.queue();

    let mut result = ClearResult {
        scope,
        cache_entries: 0,
        pending_actions: 0,
        dead_letters: 0,
    };
    if scope != Scope::Queue {
        result.cache_entries = cache.len();
    }
    if scope != Scope::Cache {
        result.pending_actions = queue.len();
        result.dead_letters = queue.dead_letter_count();
    }

    match scope {
        Scope::Cache => cache.clear()?,
        Scope::Queue => queue.clear()?,
        Scope::All => engine.logout()?,
    }

    match format {
        Format::Json => print_json(&result)?,
        Format::Text => {
            println!(
                "Cleared {} cache entries, {} pending actions, {} dead letters",
                result.cache_entries, result.pending_actions, result.dead_letters
            );
        }
    }
    Ok(())
}
