use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Status of one recipient row in the send queue.
///
/// There is no stored "claimed" state; a row is considered claimed while it
/// is `pending` with a `claimed_at` stamp younger than the lease window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Success,
    Failed,
}

/// One recipient row from the queue table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub record_id: String,
    pub job_id: String,
    pub email: String,
    pub status: QueueItemStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Upsert key: one queue row per (job, address) pair.
    pub fn dedup_key(job_id: &str, email: &str) -> String {
        format!("{}:{}", job_id, email)
    }
}

/// Identity of one claim pass and the lease window that bounds it.
///
/// A claim stamped by a crashed worker becomes reclaimable once it is older
/// than `ttl`.
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: String,
    pub ttl: chrono::Duration,
}

impl Lease {
    pub fn new(ttl: chrono::Duration) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("worker-{}-{}", Utc::now().timestamp_millis(), &suffix[..8]),
            ttl,
        }
    }

    /// Claims stamped before this instant count as expired.
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.ttl
    }
}

/// Outcome of one send attempt, destined for the write-back batch.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent { at: DateTime<Utc> },
    Failed { error: String, retry_count: i32 },
}

/// A queue row paired with the outcome of its send attempt.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub record_id: String,
    pub outcome: SendOutcome,
}

/// Per-status row counts for one job's queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub claimed: usize,
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}
