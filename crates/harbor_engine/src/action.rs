//! Pending action types.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a queued action.
///
/// Assigned at enqueue time and sent to the remote side as the idempotency
/// key, so a replay of an already-applied action can be recognized there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of mutation an action performs on its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Create a new resource.
    Create,
    /// Update an existing resource.
    Update,
    /// Delete a resource.
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => f.write_str("create"),
            ActionKind::Update => f.write_str("update"),
            ActionKind::Delete => f.write_str("delete"),
        }
    }
}

/// A mutating operation waiting to be replayed against the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique identifier and idempotency key.
    pub id: ActionId,
    /// Enqueue order; the queue replays in ascending sequence.
    pub sequence: u64,
    /// Mutation kind.
    pub kind: ActionKind,
    /// Logical resource path or endpoint.
    pub target: String,
    /// Request body.
    pub payload: serde_json::Value,
    /// When the action was enqueued.
    pub enqueued_at: Timestamp,
    /// Failed executions so far.
    pub attempts: u32,
    /// Failed executions allowed before dead-lettering.
    pub max_attempts: u32,
    /// Message of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingAction {
    /// Creates a fresh action with no recorded attempts.
    pub fn new(
        sequence: u64,
        kind: ActionKind,
        target: impl Into<String>,
        payload: serde_json::Value,
        enqueued_at: Timestamp,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: ActionId::generate(),
            sequence,
            kind,
            target: target.into(),
            payload,
            enqueued_at,
            attempts: 0,
            max_attempts,
            last_error: None,
        }
    }

    /// Returns true once the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
