use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BatchStatus, RecordId, WalkId};

/// Snapshot of the serial queue's counters.
///
/// `pending` includes the task currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
}

/// Snapshot of one walk's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkReport {
    pub walk: WalkId,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    /// Matching records counted when the walk started.
    pub estimated_records: u64,
    /// Page tasks that queried the store, including the final empty probe.
    pub pages_run: u64,
    pub records_processed: u64,
    /// Id of the last record the handler accepted.
    pub last_seen: Option<RecordId>,
}
