//! Dead-letters command implementation.

use super::{open_engine, open_table, print_json, CliResult};
use crate::Format;
use harbor_engine::{ActionId, EngineConfig, PendingAction};
use std::path::Path;

/// What to do with the dead-letter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print every dead letter.
    List,
    /// Move one dead letter back to the live queue.
    Requeue(String),
    /// Drop one dead letter permanently.
    Discard(String),
}

/// Runs the dead-letters command.
pub fn run(path: &Path, config: &EngineConfig, action: Action, format: Format) -> CliResult<()> {
    let table = open_table(path)?;
    let engine = open_engine(table, config)?;
    let queue = engine.queue();

    match action {
        Action::List => {
            let dead = queue.dead_letters();
            match format {
                Format::Json => print_json(&dead)?,
                Format::Text => print_dead_letters(&dead),
            }
        }
        Action::Requeue(id) => {
            let id = ActionId::from(id);
            queue.requeue_dead_letter(&id)?;
            println!("Requeued {} ({} pending)", id, queue.len());
        }
        Action::Discard(id) => {
            let discarded = queue.discard_dead_letter(&ActionId::from(id))?;
            match format {
                Format::Json => print_json(&discarded)?,
                Format::Text => println!("Discarded {} {} {}", discarded.id, discarded.kind, discarded.target),
            }
        }
    }
    Ok(())
}

fn print_dead_letters(dead: &[PendingAction]) {
    if dead.is_empty() {
        println!("No dead-lettered actions");
        return;
    }

    println!("Dead-lettered actions: {}", dead.len());
    println!();
    for action in dead {
        println!("{} [#{}]", action.id, action.sequence);
        println!("  {} {}", action.kind, action.target);
        println!(
            "  attempts: {}/{}, enqueued: {}",
            action.attempts, action.max_attempts, action.enqueued_at
        );
        if let Some(error) = &action.last_error {
            println!("  last error: {}", error);
        }
    }
}
