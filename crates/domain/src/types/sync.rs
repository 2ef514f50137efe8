//! Synchronisation bookkeeping

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::actions::ActionKind;

/// Process-wide sync status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub last_error: Option<String>,
    pub pending_actions: usize,
    /// Earliest time an automatic sync is allowed to run again.
    pub next_sync_at: Option<DateTime<Utc>>,
}

/// Stage of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Starting,
    Processing,
    Completed,
    Failed,
}

/// Progress notification for UI observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub percent: u8,
    pub current_item: Option<String>,
    pub processed: usize,
    pub total: usize,
}

impl SyncProgress {
    /// Progress at `processed` of `total` actions.
    pub fn new(phase: SyncPhase, processed: usize, total: usize) -> Self {
        let percent = match (phase, total) {
            (SyncPhase::Completed, _) => 100,
            (_, 0) => 0,
            _ => u8::try_from(processed.min(total) * 100 / total).unwrap_or(100),
        };
        Self { phase, percent, current_item: None, processed, total }
    }

    /// Attach the id of the action being processed.
    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }
}

/// Server-side conflict; reserved, never produced by the client core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub action_id: String,
    pub local: serde_json::Value,
    pub remote: serde_json::Value,
}

/// Replay failure of a single action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub action_id: Option<String>,
    pub kind: Option<ActionKind>,
    pub message: String,
    pub retryable: bool,
}

/// Summary of a full sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub synced_actions: usize,
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<SyncErrorRecord>,
    pub duration: Duration,
}
