use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::models::job::JobStatus;
use crate::models::queue::{ItemResult, Lease, SendOutcome};
use crate::services::mailer::Mailer;
use crate::store::{FlushReport, JobRegistry, QueueStore, StoreError};

/// Longest error text written back to a queue row.
const MAX_ERROR_LEN: usize = 500;

/// Tunables for one dispatch worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Rows claimed per batch.
    pub batch_size: usize,
    /// Pause between individual sends.
    pub send_interval: Duration,
    /// Wall-clock budget for one cycle; no new batch starts once spent.
    pub execution_budget: Duration,
    /// How long a claim stamp shields a row from other workers.
    pub lease_ttl: chrono::Duration,
    /// Base URL unsubscribe links point at.
    pub public_base_url: String,
}

impl DispatchConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.dispatch_batch_size,
            send_interval: Duration::from_millis(config.send_interval_ms),
            execution_budget: Duration::from_secs(config.execution_budget_secs),
            lease_ttl: chrono::Duration::seconds(config.lease_duration_secs as i64),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

/// What one dispatch cycle did.
#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub job_id: String,
    /// Lease the cycle's claims were stamped with.
    pub lease_id: String,
    /// Rows claimed and attempted this cycle.
    pub processed: usize,
    /// Outcomes recorded as success.
    pub succeeded: usize,
    /// Outcomes recorded as failure.
    pub failed: usize,
    /// Rows still pending after the cycle.
    pub remaining: usize,
    pub status: JobStatus,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drains one job's queue: claim a batch under a lease, send each message
/// with a fixed pause, write outcomes back, repeat until the queue or the
/// time budget is exhausted.
pub struct DispatchWorker {
    jobs: Arc<dyn JobRegistry>,
    queue: Arc<dyn QueueStore>,
    mailer: Arc<dyn Mailer>,
    config: DispatchConfig,
}

impl DispatchWorker {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        queue: Arc<dyn QueueStore>,
        mailer: Arc<dyn Mailer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            jobs,
            queue,
            mailer,
            config,
        }
    }

    /// Run one dispatch cycle for `job_id`.
    ///
    /// Safe to invoke repeatedly and from several workers at once: rows are
    /// claimed under a fresh lease per cycle, and a cycle that finds nothing
    /// pending only re-checks completion.
    pub async fn run_cycle(&self, job_id: &str) -> Result<DispatchSummary, DispatchError> {
        let started = Instant::now();
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;

        let lease = Lease::new(self.config.lease_ttl);
        info!(
            job_id = %job.job_id,
            lease = %lease.id,
            batch_size = self.config.batch_size,
            "starting dispatch cycle"
        );
        counter!("newsletter_dispatch_cycles_total").increment(1);

        let mut processed = 0usize;
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        loop {
            if started.elapsed() >= self.config.execution_budget {
                info!(job_id = %job.job_id, processed, "execution budget spent, stopping cycle");
                break;
            }

            let batch = self
                .queue
                .claim_batch(&job.job_id, &lease, self.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }
            debug!(job_id = %job.job_id, count = batch.len(), "claimed batch");

            let mut results = Vec::with_capacity(batch.len());
            for item in &batch {
                let unsubscribe = unsubscribe_url(&self.config.public_base_url, &item.email);
                let html = newsletter_html(&job.content, &unsubscribe);
                match self.mailer.send(&item.email, &job.subject, &html).await {
                    Ok(()) => {
                        counter!("newsletter_sends_total").increment(1);
                        results.push(ItemResult {
                            record_id: item.record_id.clone(),
                            outcome: SendOutcome::Sent { at: Utc::now() },
                        });
                    }
                    Err(e) => {
                        counter!("newsletter_sends_failed").increment(1);
                        warn!(job_id = %job.job_id, email = %item.email, error = %e, "send failed");
                        results.push(ItemResult {
                            record_id: item.record_id.clone(),
                            outcome: SendOutcome::Failed {
                                error: truncate_error(&e.to_string()),
                                retry_count: item.retry_count + 1,
                            },
                        });
                    }
                }
                sleep(self.config.send_interval).await;
            }

            let report = match self.queue.flush_results(&results).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "result flush failed; rows stay claimable");
                    FlushReport::default()
                }
            };
            if report.dropped > 0 {
                warn!(
                    job_id = %job.job_id,
                    dropped = report.dropped,
                    "outcomes not recorded; rows will be retried"
                );
            }

            // Job counters track recorded outcomes, so rows whose write-back
            // was lost are counted when they are eventually re-sent.
            if report.recorded_success > 0 || report.recorded_failed > 0 {
                if let Err(e) = self
                    .jobs
                    .add_send_counts(
                        &job.record_id,
                        report.recorded_success as u32,
                        report.recorded_failed as u32,
                    )
                    .await
                {
                    warn!(job_id = %job.job_id, error = %e, "failed to update job counters");
                }
            }

            processed += batch.len();
            succeeded += report.recorded_success;
            failed += report.recorded_failed;
        }

        let remaining = self.queue.count_pending(&job.job_id).await?;
        gauge!("newsletter_queue_remaining").set(remaining as f64);

        let status = if remaining == 0 {
            if job.status != JobStatus::Completed {
                self.jobs.mark_completed(&job.record_id, Utc::now()).await?;
            }
            JobStatus::Completed
        } else {
            self.jobs.mark_sending(&job.record_id).await?;
            JobStatus::Sending
        };

        let elapsed = started.elapsed();
        histogram!("newsletter_dispatch_cycle_seconds").record(elapsed.as_secs_f64());
        info!(
            job_id = %job.job_id,
            processed,
            succeeded,
            failed,
            remaining,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "dispatch cycle finished"
        );

        Ok(DispatchSummary {
            job_id: job.job_id,
            lease_id: lease.id,
            processed,
            succeeded,
            failed,
            remaining,
            status,
            elapsed,
        })
    }
}

/// Compose the outgoing HTML: job body plus the sender's footer carrying
/// the per-recipient unsubscribe link.
pub fn newsletter_html(content: &str, unsubscribe_url: &str) -> String {
    format!(
        concat!(
            "{content}\n",
            "<hr style=\"margin: 30px 0; border: none; border-top: 1px solid #e5e7eb;\">\n",
            "<div style=\"text-align: center; padding: 20px; background-color: #f9fafb; ",
            "font-size: 12px; color: #6b7280; font-family: Arial, sans-serif;\">\n",
            "  <p style=\"margin: 0 0 10px 0;\">このメールは NANKANアナリティクス からお送りしています</p>\n",
            "  <p style=\"margin: 10px 0;\">\n",
            "    <a href=\"{url}\" style=\"color: #dc2626; text-decoration: underline;\">🚫 配信停止はこちら</a>\n",
            "  </p>\n",
            "</div>\n",
        ),
        content = content,
        url = unsubscribe_url,
    )
}

pub fn unsubscribe_url(base_url: &str, email: &str) -> String {
    format!(
        "{}/unsubscribe?email={}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(email)
    )
}

/// Clamp error text to what fits in a queue row.
fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_url_encodes_address() {
        let url = unsubscribe_url("https://news.example.com/", "user+tag@example.com");
        assert_eq!(
            url,
            "https://news.example.com/unsubscribe?email=user%2Btag%40example.com"
        );
    }

    #[test]
    fn test_newsletter_html_embeds_body_and_link() {
        let html = newsletter_html("<p>Hello</p>", "https://x/unsubscribe?email=a%40b");
        assert!(html.contains("<p>Hello</p>"));
        assert!(html.contains("href=\"https://x/unsubscribe?email=a%40b\""));
    }

    #[test]
    fn test_truncate_error_clamps_long_messages() {
        let long = "x".repeat(800);
        assert_eq!(truncate_error(&long).len(), MAX_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_truncate_error_counts_chars_not_bytes() {
        let long = "é".repeat(600);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);
    }
}
