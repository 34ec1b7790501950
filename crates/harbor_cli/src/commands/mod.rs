//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod dead_letters;
pub mod inspect;
pub mod sweep;

use async_trait::async_trait;
use harbor_engine::{
    ActionExecutor, Engine, EngineConfig, EngineError, ExecutionOutcome, PendingAction,
};
use harbor_storage::{FileTable, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No table log in the given directory.
    #[error("no Harbor table found at {0}")]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Engine error.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Engine type opened by maintenance commands.
pub type MaintenanceEngine = Engine<FileTable, Unreachable>;

/// Executor for maintenance mode, where actions are never replayed.
pub struct Unreachable;

#[async_trait]
impl ActionExecutor for Unreachable {
    async fn execute(&self, _action: &PendingAction) -> ExecutionOutcome {
        ExecutionOutcome::RetryableFailure("no remote side in maintenance mode".into())
    }
}

/// Loads the engine configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let json = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(EngineConfig::from_json_str(&json)?)
}

/// Opens an existing table without creating one.
pub fn open_table(path: &Path) -> CliResult<Arc<FileTable>> {
    if !FileTable::exists(path) {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    Ok(Arc::new(FileTable::open(path)?))
}

/// Opens an engine over `table` that stays offline.
pub fn open_engine(table: Arc<FileTable>, config: &EngineConfig) -> CliResult<MaintenanceEngine> {
    let (_signal, offline) = watch::channel(false);
    Ok(Engine::open(table, Unreachable, offline, config.clone())?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_engine::ActionKind;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn missing_table_is_not_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nothing-here");
        assert!(matches!(open_table(&path), Err(CliError::NotFound(_))));
        assert!(!path.exists());
    }

    #[test]
    fn maintenance_engine_stays_offline() {
        let dir = tempdir().unwrap();
        FileTable::open(dir.path()).unwrap();

        let table = open_table(dir.path()).unwrap();
        let engine = open_engine(table, &EngineConfig::default()).unwrap();
        engine
            .enqueue(ActionKind::Create, "/pets", json!({"name": "Rex"}))
            .unwrap();
        assert!(!engine.status().is_online);
        assert_eq!(engine.status().pending_count, 1);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harbor.json");
        std::fs::write(&path, r#"{ "max_total_bytes": 4096 }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_total_bytes, 4096);
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());
        assert!(matches!(
            load_config(Some(&dir.path().join("missing.json"))),
            Err(CliError::ConfigRead { .. })
        ));
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(50 * 1024 * 1024), "50.0 MB");
    }
}
