use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle of a newsletter send job.
///
/// A job is `draft` until its recipient snapshot is queued, `queued` until a
/// worker first picks it up, `sending` while queue rows remain, and
/// `completed` once a dispatch cycle finds no pending rows left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Draft,
    Queued,
    Sending,
    Completed,
}

/// Which subscriber plans a job targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetPlan {
    #[default]
    All,
    Free,
    Standard,
    Premium,
}

/// A newsletter job as held in the row store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    /// Row-store record id (distinct from the external `job_id`).
    pub record_id: String,
    pub job_id: String,
    pub subject: String,
    pub content: String,
    pub target_plan: TargetPlan,
    pub status: JobStatus,
    pub total_recipients: u32,
    pub sent_success: u32,
    pub sent_failed: u32,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a job; the store assigns the record id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub subject: String,
    pub content: String,
    pub target_plan: TargetPlan,
}
