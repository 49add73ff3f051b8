use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processed,
    Failed,
}

/// A recorded mutation intent awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub action: SyncAction,
    pub module: String,
    pub table: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub status: QueueStatus,
    pub retries: u32,
}

impl QueueItem {
    pub fn pending(action: SyncAction, module: &str, table: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            module: module.to_string(),
            table: table.to_string(),
            payload,
            timestamp: Utc::now(),
            status: QueueStatus::Pending,
            retries: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }
}

/// Outcome of one `process_sync_queue` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another run was already active; nothing was done.
    pub skipped: bool,
    pub attempted: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}
