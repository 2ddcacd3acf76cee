use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::models::job::{JobStatus, NewJob, SendJob};
use crate::store::{JobRegistry, QueueStore, RecipientDirectory, StoreError};

/// Result of queueing a job's recipient snapshot.
#[derive(Debug, Clone)]
pub struct ScheduleSummary {
    pub job: SendJob,
    /// Addresses waiting in the queue.
    pub total_recipients: u32,
    /// Addresses lost to failed queue writes.
    pub failed_recipients: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The target plan matched no deliverable address; the job stays draft.
    #[error("no recipients for job {0}")]
    NoRecipients(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates a job and freezes its recipient list into pending queue rows.
///
/// The membership snapshot is taken once, at scheduling time. Addresses that
/// subscribe later are not added to an already queued job.
pub struct JobScheduler {
    jobs: Arc<dyn JobRegistry>,
    queue: Arc<dyn QueueStore>,
    directory: Arc<dyn RecipientDirectory>,
}

impl JobScheduler {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        queue: Arc<dyn QueueStore>,
        directory: Arc<dyn RecipientDirectory>,
    ) -> Self {
        Self {
            jobs,
            queue,
            directory,
        }
    }

    pub async fn schedule(&self, new_job: NewJob) -> Result<ScheduleSummary, ScheduleError> {
        let mut job = self.jobs.create_job(&new_job).await?;
        info!(job_id = %job.job_id, target = %job.target_plan, "created draft job");

        let recipients = self.directory.list_recipients(job.target_plan).await?;
        if recipients.is_empty() {
            warn!(job_id = %job.job_id, target = %job.target_plan, "no recipients matched");
            return Err(ScheduleError::NoRecipients(job.job_id));
        }

        let outcome = self
            .queue
            .enqueue_recipients(&job.job_id, &recipients)
            .await?;
        if outcome.failed > 0 {
            warn!(
                job_id = %job.job_id,
                failed = outcome.failed,
                "some recipients were not enqueued"
            );
        }

        let queued_at = Utc::now();
        self.jobs
            .mark_queued(&job.record_id, outcome.enqueued, queued_at)
            .await?;
        job.status = JobStatus::Queued;
        job.total_recipients = outcome.enqueued;
        job.queued_at = Some(queued_at);

        info!(
            job_id = %job.job_id,
            recipients = outcome.enqueued,
            created = outcome.created,
            "job queued"
        );

        Ok(ScheduleSummary {
            job,
            total_recipients: outcome.enqueued,
            failed_recipients: outcome.failed,
        })
    }
}
