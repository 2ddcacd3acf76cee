use chrono::{DateTime, SecondsFormat, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{JobStatus, SendJob, TargetPlan};
use crate::models::queue::QueueStats;

/// Timestamp carried in response envelopes (millisecond UTC, RFC 3339).
pub fn wire_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// POST /api/v1/jobs request body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// External job id; generated when omitted.
    #[garde(inner(length(min = 1, max = 100)))]
    #[serde(default)]
    pub job_id: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub subject: String,

    /// Newsletter body as HTML.
    #[garde(length(min = 1, max = 100_000))]
    pub content: String,

    #[garde(skip)]
    #[serde(default)]
    pub target_plan: TargetPlan,
}

/// POST /unsubscribe request body.
#[derive(Debug, Deserialize, Validate)]
pub struct UnsubscribeRequest {
    #[garde(email)]
    pub email: String,
}

/// Wire view of a job, shared by the status and history endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub subject: String,
    pub target_plan: TargetPlan,
    pub status: JobStatus,
    pub total_recipients: u32,
    pub sent_success: u32,
    pub sent_failed: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&SendJob> for JobView {
    fn from(job: &SendJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            subject: job.subject.clone(),
            target_plan: job.target_plan,
            status: job.status,
            total_recipients: job.total_recipients,
            sent_success: job.sent_success,
            sent_failed: job.sent_failed,
            created_at: job.created_at,
            queued_at: job.queued_at,
            completed_at: job.completed_at,
        }
    }
}

/// Response for POST /api/v1/jobs.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub success: bool,
    pub job_id: String,
    pub status: JobStatus,
    pub target_plan: TargetPlan,
    pub total_recipients: u32,
    /// Rows that could not be written into the queue (batch write errors).
    pub failed_recipients: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
}

/// Response for POST /api/v1/jobs/{job_id}/dispatch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub job_id: String,
    pub lease_id: String,
    pub total_processed: usize,
    pub total_success: usize,
    pub total_failed: usize,
    pub remaining_count: usize,
    pub status: JobStatus,
    /// Wall-clock cycle time in whole seconds.
    pub execution_time: u64,
    pub timestamp: String,
}

/// Response for GET /api/v1/jobs/{job_id}.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub success: bool,
    pub job: JobView,
    pub queue_stats: QueueStats,
    pub timestamp: String,
}

/// Response for GET /api/v1/jobs.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub success: bool,
    pub count: usize,
    pub jobs: Vec<JobView>,
}

/// Response for POST /api/v1/jobs/{job_id}/retry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub success: bool,
    pub job_id: String,
    /// Failed rows returned to pending.
    pub retry_count: usize,
    pub message: String,
}

/// Response for POST /unsubscribe.
#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub success: bool,
    pub message: String,
    pub email: String,
}
