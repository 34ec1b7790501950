//! Harbor CLI
//!
//! Maintenance tools for a file-backed Harbor engine directory.
//!
//! # Commands
//!
//! - `inspect` - Display table, cache and queue statistics
//! - `dead-letters` - List, requeue or discard dead-lettered actions
//! - `sweep` - Remove expired cache entries and enforce the size budget
//! - `compact` - Rewrite the table log to reclaim space
//! - `clear` - Drop cached entries and/or queued actions

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Harbor offline engine maintenance tools.
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display table, cache and queue statistics
    Inspect {
        /// List every cache entry
        #[arg(short, long)]
        entries: bool,
    },

    /// List, requeue or discard dead-lettered actions
    DeadLetters {
        /// Move this action back to the live queue
        #[arg(long, conflicts_with = "discard")]
        requeue: Option<String>,

        /// Permanently drop this action
        #[arg(long)]
        discard: Option<String>,
    },

    /// Remove expired cache entries and enforce the size budget
    Sweep {
        /// Show what would be removed without removing it
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Rewrite the table log to reclaim space
    Compact,

    /// Drop cached entries and/or queued actions
    Clear {
        /// Only clear the cache
        #[arg(long, conflicts_with = "queue")]
        cache: bool,

        /// Only clear the action queue, including dead letters
        #[arg(long)]
        queue: bool,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { entries } => {
            let path = cli.path.ok_or("Engine path required for inspect")?;
            commands::inspect::run(&path, &config, entries, cli.format)?;
        }
        Commands::DeadLetters { requeue, discard } => {
            let path = cli.path.ok_or("Engine path required for dead-letters")?;
            let action = match (requeue, discard) {
                (Some(id), _) => commands::dead_letters::Action::Requeue(id),
                (None, Some(id)) => commands::dead_letters::Action::Discard(id),
                (None, None) => commands::dead_letters::Action::List,
            };
            commands::dead_letters::run(&path, &config, action, cli.format)?;
        }
        Commands::Sweep { dry_run } => {
            let path = cli.path.ok_or("Engine path required for sweep")?;
            commands::sweep::run(&path, &config, dry_run, cli.format)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Engine path required for compact")?;
            commands::compact::run(&path, cli.format)?;
        }
        Commands::Clear { cache, queue, yes } => {
            let path = cli.path.ok_or("Engine path required for clear")?;
            if !yes {
                return Err("Refusing to clear without --yes".into());
            }
            let scope = match (cache, queue) {
                (true, _) => commands::clear::Scope::Cache,
                (false, true) => commands::clear::Scope::Queue,
                (false, false) => commands::clear::Scope::All,
            };
            commands::clear::run(&path, &config, scope, cli.format)?;
        }
        Commands::Version => {
            println!("Harbor CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
