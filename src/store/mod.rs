//! Access to the external row store holding jobs, the send queue, and the
//! subscriber directory.
//!
//! Trait seams keep the dispatch pipeline independent of the wire client so
//! tests can drive it against in-memory doubles.

pub mod client;
pub mod customers;
pub mod jobs;
pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::job::{NewJob, SendJob, TargetPlan};
use crate::models::queue::{ItemResult, Lease, QueueItem, QueueStats};

pub use client::{ListQuery, Record, RecordPatch, RowStoreClient};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("row store returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Render a timestamp the way the row store expects it (millisecond UTC).
pub(crate) fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Escape a value for embedding in a filter formula string literal.
pub(crate) fn escape_formula(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Counts from pushing a recipient snapshot into the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Rows present in the queue after the upsert (created or refreshed).
    pub enqueued: u32,
    /// Rows newly created by the upsert.
    pub created: u32,
    /// Rows lost to failed write batches.
    pub failed: u32,
}

/// Counts from writing a batch of send outcomes back to the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub recorded_success: usize,
    pub recorded_failed: usize,
    /// Outcomes lost to failed write batches; their rows stay claimable.
    pub dropped: usize,
}

/// Registry of newsletter jobs.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Create a job in draft status.
    async fn create_job(&self, job: &NewJob) -> Result<SendJob, StoreError>;

    async fn find_job(&self, job_id: &str) -> Result<Option<SendJob>, StoreError>;

    /// Most recently created jobs first.
    async fn list_recent_jobs(&self, limit: usize) -> Result<Vec<SendJob>, StoreError>;

    /// Move a draft job to queued and freeze its recipient total.
    async fn mark_queued(
        &self,
        record_id: &str,
        total_recipients: u32,
        queued_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_sending(&self, record_id: &str) -> Result<(), StoreError>;

    async fn mark_completed(
        &self,
        record_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Add recorded outcome counts to the job's running totals.
    async fn add_send_counts(
        &self,
        record_id: &str,
        succeeded: u32,
        failed: u32,
    ) -> Result<(), StoreError>;
}

/// Per-recipient send queue.
///
/// `claim_batch` must hand a given row to at most one live lease: a row whose
/// claim stamp is younger than the lease window stays invisible to other
/// callers until the claim expires or the row's outcome is written.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Upsert one pending row per address, keyed on `job_id:email`.
    async fn enqueue_recipients(
        &self,
        job_id: &str,
        emails: &[String],
    ) -> Result<EnqueueOutcome, StoreError>;

    /// Claim up to `limit` unclaimed (or expired-claim) pending rows.
    async fn claim_batch(
        &self,
        job_id: &str,
        lease: &Lease,
        limit: usize,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Write send outcomes back, clearing claim stamps on recorded rows.
    async fn flush_results(&self, results: &[ItemResult]) -> Result<FlushReport, StoreError>;

    /// Rows still pending, claimed or not.
    async fn count_pending(&self, job_id: &str) -> Result<usize, StoreError>;

    async fn stats(&self, job_id: &str) -> Result<QueueStats, StoreError>;

    /// Return failed rows to pending so the next cycle retries them.
    async fn reset_failed(&self, job_id: &str) -> Result<usize, StoreError>;
}

/// Subscriber directory that recipient snapshots are drawn from.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Deliverable addresses for a plan, normalized and deduplicated.
    async fn list_recipients(&self, target: TargetPlan) -> Result<Vec<String>, StoreError>;

    /// Flag an address as unsubscribed. Returns false when unknown.
    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError>;
}
