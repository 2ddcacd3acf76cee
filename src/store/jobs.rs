use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::models::job::{JobStatus, NewJob, SendJob, TargetPlan};

use super::client::{ListQuery, Record, RowStoreClient};
use super::{escape_formula, iso, JobRegistry, StoreError};

pub const JOBS_TABLE: &str = "NewsletterJobs";

/// Wire shape of one jobs-table row. Empty cells are omitted by the store,
/// so everything optional defaults.
#[derive(Debug, Deserialize)]
struct JobFields {
    #[serde(rename = "JobId")]
    job_id: String,
    #[serde(rename = "Subject", default)]
    subject: String,
    #[serde(rename = "Content", default)]
    content: String,
    #[serde(rename = "TargetPlan", default)]
    target_plan: TargetPlan,
    #[serde(rename = "Status")]
    status: JobStatus,
    #[serde(rename = "TotalRecipients", default)]
    total_recipients: u32,
    #[serde(rename = "SentSuccess", default)]
    sent_success: u32,
    #[serde(rename = "SentFailed", default)]
    sent_failed: u32,
    #[serde(rename = "CreatedAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "QueuedAt", default)]
    queued_at: Option<DateTime<Utc>>,
    #[serde(rename = "CompletedAt", default)]
    completed_at: Option<DateTime<Utc>>,
}

fn to_job(record: Record<JobFields>) -> SendJob {
    let fields = record.fields;
    SendJob {
        record_id: record.id,
        job_id: fields.job_id,
        subject: fields.subject,
        content: fields.content,
        target_plan: fields.target_plan,
        status: fields.status,
        total_recipients: fields.total_recipients,
        sent_success: fields.sent_success,
        sent_failed: fields.sent_failed,
        created_at: fields.created_at,
        queued_at: fields.queued_at,
        completed_at: fields.completed_at,
    }
}

#[async_trait]
impl JobRegistry for RowStoreClient {
    async fn create_job(&self, job: &NewJob) -> Result<SendJob, StoreError> {
        let fields = json!({
            "JobId": job.job_id,
            "Subject": job.subject,
            "Content": job.content,
            "TargetPlan": job.target_plan.to_string(),
            "Status": JobStatus::Draft.to_string(),
            "CreatedAt": iso(Utc::now()),
            "SentSuccess": 0,
            "SentFailed": 0,
        });
        let record: Record<JobFields> = self.create_record(JOBS_TABLE, fields).await?;
        Ok(to_job(record))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<SendJob>, StoreError> {
        let formula = format!(r#"{{JobId}} = "{}""#, escape_formula(job_id));
        let records: Vec<Record<JobFields>> = self
            .list(JOBS_TABLE, &ListQuery::new().filter(formula).max_records(1))
            .await?;
        Ok(records.into_iter().next().map(to_job))
    }

    async fn list_recent_jobs(&self, limit: usize) -> Result<Vec<SendJob>, StoreError> {
        let records: Vec<Record<JobFields>> = self
            .list(
                JOBS_TABLE,
                &ListQuery::new().max_records(limit).sort_desc("CreatedAt"),
            )
            .await?;
        Ok(records.into_iter().map(to_job).collect())
    }

    async fn mark_queued(
        &self,
        record_id: &str,
        total_recipients: u32,
        queued_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.patch_record(
            JOBS_TABLE,
            record_id,
            json!({
                "Status": JobStatus::Queued.to_string(),
                "TotalRecipients": total_recipients,
                "QueuedAt": iso(queued_at),
            }),
        )
        .await
    }

    async fn mark_sending(&self, record_id: &str) -> Result<(), StoreError> {
        self.patch_record(
            JOBS_TABLE,
            record_id,
            json!({ "Status": JobStatus::Sending.to_string() }),
        )
        .await
    }

    async fn mark_completed(
        &self,
        record_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.patch_record(
            JOBS_TABLE,
            record_id,
            json!({
                "Status": JobStatus::Completed.to_string(),
                "CompletedAt": iso(completed_at),
            }),
        )
        .await
    }

    async fn add_send_counts(
        &self,
        record_id: &str,
        succeeded: u32,
        failed: u32,
    ) -> Result<(), StoreError> {
        // The store has no atomic increment; re-read the row so counts from
        // earlier batches and other workers are not overwritten.
        let current: Record<JobFields> = self.get_record(JOBS_TABLE, record_id).await?;
        self.patch_record(
            JOBS_TABLE,
            record_id,
            json!({
                "SentSuccess": current.fields.sent_success + succeeded,
                "SentFailed": current.fields.sent_failed + failed,
            }),
        )
        .await
    }
}
