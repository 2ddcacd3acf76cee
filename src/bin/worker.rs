use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use newsletter_dispatch::config::AppConfig;
use newsletter_dispatch::models::job::JobStatus;
use newsletter_dispatch::services::dispatch::{DispatchConfig, DispatchWorker};
use newsletter_dispatch::services::mailer::{MailApiClient, Mailer};
use newsletter_dispatch::store::{JobRegistry, QueueStore, RowStoreClient};

const POLL_INTERVAL_SECS: u64 = 30;

/// Jobs examined per poll, newest first.
const POLL_WINDOW: usize = 20;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting newsletter dispatch worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize the row store client and mail provider
    let store = Arc::new(RowStoreClient::new(
        &config.store_url(),
        &config.store_api_key,
        config.store_write_batch_size,
        Duration::from_millis(config.store_request_delay_ms),
    ));
    let jobs: Arc<dyn JobRegistry> = store.clone();
    let queue: Arc<dyn QueueStore> = store;

    let mailer: Arc<dyn Mailer> = Arc::new(MailApiClient::new(
        &config.mail_base_url,
        &config.mail_api_key,
        &config.sender_name,
        &config.sender_email,
    ));

    let worker = DispatchWorker::new(
        jobs.clone(),
        queue,
        mailer,
        DispatchConfig::from_config(&config),
    );

    tracing::info!("Worker ready, polling for queued jobs");

    // Main processing loop
    loop {
        match run_actionable_jobs(&worker, jobs.as_ref()).await {
            Ok(true) => {
                // A cycle ran; look again right away for remaining work
                tracing::debug!("Dispatch cycle ran, checking for more work");
            }
            Ok(false) => {
                tracing::trace!("No actionable jobs, sleeping");
                sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker poll failed, will retry");
                sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            }
        }
    }
}

/// Run one dispatch cycle for every job still in queued or sending state.
/// Returns Ok(true) if at least one cycle ran.
async fn run_actionable_jobs(
    worker: &DispatchWorker,
    jobs: &dyn JobRegistry,
) -> Result<bool, Box<dyn std::error::Error>> {
    let recent = jobs.list_recent_jobs(POLL_WINDOW).await?;
    let mut ran = false;

    for job in recent {
        if !matches!(job.status, JobStatus::Queued | JobStatus::Sending) {
            continue;
        }

        tracing::info!(job_id = %job.job_id, status = %job.status, "Running dispatch cycle");
        match worker.run_cycle(&job.job_id).await {
            Ok(summary) => {
                ran = true;
                tracing::info!(
                    job_id = %summary.job_id,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    remaining = summary.remaining,
                    status = %summary.status,
                    "Dispatch cycle finished"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Dispatch cycle failed");
            }
        }
    }

    Ok(ran)
}
