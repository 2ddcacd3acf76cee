//! In-memory doubles and server harness shared by the dispatch and API tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use newsletter_dispatch::app_state::AppState;
use newsletter_dispatch::models::job::{JobStatus, NewJob, SendJob, TargetPlan};
use newsletter_dispatch::models::queue::{
    ItemResult, Lease, QueueItem, QueueItemStatus, QueueStats, SendOutcome,
};
use newsletter_dispatch::services::dispatch::{DispatchConfig, DispatchWorker};
use newsletter_dispatch::services::mailer::{MailError, Mailer};
use newsletter_dispatch::services::scheduler::JobScheduler;
use newsletter_dispatch::store::{
    EnqueueOutcome, FlushReport, JobRegistry, QueueStore, RecipientDirectory, StoreError,
};

#[derive(Debug, Clone)]
pub struct TestMember {
    pub email: String,
    pub plan: TargetPlan,
    pub unsubscribed: bool,
}

pub fn member(email: &str, plan: TargetPlan) -> TestMember {
    TestMember {
        email: email.to_string(),
        plan,
        unsubscribed: false,
    }
}

#[derive(Default)]
struct StoreInner {
    jobs: Vec<SendJob>,
    queue: Vec<QueueItem>,
    members: Vec<TestMember>,
    next_id: u64,
}

impl StoreInner {
    fn next_record_id(&mut self) -> String {
        self.next_id += 1;
        format!("rec{:06}", self.next_id)
    }
}

/// Backs all three store traits with plain vectors. Claims are atomic under
/// the lock, unlike the best-effort production client.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    claim_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_members(members: Vec<TestMember>) -> Arc<Self> {
        let store = Self::default();
        store.inner.lock().unwrap().members = members;
        Arc::new(store)
    }

    pub fn job(&self, job_id: &str) -> Option<SendJob> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .iter()
            .find(|job| job.job_id == job_id)
            .cloned()
    }

    pub fn queue_rows(&self, job_id: &str) -> Vec<QueueItem> {
        self.inner
            .lock()
            .unwrap()
            .queue
            .iter()
            .filter(|item| item.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn member_record(&self, email: &str) -> Option<TestMember> {
        self.inner
            .lock()
            .unwrap()
            .members
            .iter()
            .find(|member| member.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    /// Shift existing claim stamps into the past, as if the claiming worker
    /// had stalled.
    pub fn age_claims(&self, job_id: &str, by: chrono::Duration) {
        let mut inner = self.inner.lock().unwrap();
        for item in inner.queue.iter_mut() {
            if item.job_id == job_id {
                if let Some(at) = item.claimed_at {
                    item.claimed_at = Some(at - by);
                }
            }
        }
    }
}

#[async_trait]
impl JobRegistry for MemoryStore {
    async fn create_job(&self, job: &NewJob) -> Result<SendJob, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record_id = inner.next_record_id();
        let created = SendJob {
            record_id,
            job_id: job.job_id.clone(),
            subject: job.subject.clone(),
            content: job.content.clone(),
            target_plan: job.target_plan,
            status: JobStatus::Draft,
            total_recipients: 0,
            sent_success: 0,
            sent_failed: 0,
            created_at: Utc::now(),
            queued_at: None,
            completed_at: None,
        };
        inner.jobs.push(created.clone());
        Ok(created)
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<SendJob>, StoreError> {
        Ok(self.job(job_id))
    }

    async fn list_recent_jobs(&self, limit: usize) -> Result<Vec<SendJob>, StoreError> {
        let mut jobs = self.inner.lock().unwrap().jobs.clone();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn mark_queued(
        &self,
        record_id: &str,
        total_recipients: u32,
        queued_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.iter_mut().find(|j| j.record_id == record_id) {
            job.status = JobStatus::Queued;
            job.total_recipients = total_recipients;
            job.queued_at = Some(queued_at);
        }
        Ok(())
    }

    async fn mark_sending(&self, record_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.iter_mut().find(|j| j.record_id == record_id) {
            job.status = JobStatus::Sending;
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        record_id: &str,
        completed_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.iter_mut().find(|j| j.record_id == record_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn add_send_counts(
        &self,
        record_id: &str,
        succeeded: u32,
        failed: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.iter_mut().find(|j| j.record_id == record_id) {
            job.sent_success += succeeded;
            job.sent_failed += failed;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue_recipients(
        &self,
        job_id: &str,
        emails: &[String],
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut outcome = EnqueueOutcome::default();
        for email in emails {
            outcome.enqueued += 1;
            if let Some(existing) = inner
                .queue
                .iter_mut()
                .find(|item| item.job_id == job_id && item.email == *email)
            {
                existing.status = QueueItemStatus::Pending;
                existing.retry_count = 0;
                existing.claimed_at = None;
                existing.claimed_by = None;
            } else {
                outcome.created += 1;
                let record_id = inner.next_record_id();
                inner.queue.push(QueueItem {
                    record_id,
                    job_id: job_id.to_string(),
                    email: email.clone(),
                    status: QueueItemStatus::Pending,
                    claimed_at: None,
                    claimed_by: None,
                    sent_at: None,
                    retry_count: 0,
                    last_error: None,
                });
            }
        }
        Ok(outcome)
    }

    async fn claim_batch(
        &self,
        job_id: &str,
        lease: &Lease,
        limit: usize,
    ) -> Result<Vec<QueueItem>, StoreError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let cutoff = lease.expiry_cutoff(now);
        let mut claimed = Vec::new();
        for item in inner.queue.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            let claimable = item.job_id == job_id
                && item.status == QueueItemStatus::Pending
                && item.claimed_at.map_or(true, |at| at < cutoff);
            if claimable {
                item.claimed_at = Some(now);
                item.claimed_by = Some(lease.id.clone());
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn flush_results(&self, results: &[ItemResult]) -> Result<FlushReport, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut report = FlushReport::default();
        for result in results {
            let Some(item) = inner
                .queue
                .iter_mut()
                .find(|item| item.record_id == result.record_id)
            else {
                report.dropped += 1;
                continue;
            };
            match &result.outcome {
                SendOutcome::Sent { at } => {
                    item.status = QueueItemStatus::Success;
                    item.sent_at = Some(*at);
                    item.claimed_at = None;
                    item.claimed_by = None;
                    report.recorded_success += 1;
                }
                SendOutcome::Failed { error, retry_count } => {
                    item.status = QueueItemStatus::Failed;
                    item.last_error = Some(error.clone());
                    item.retry_count = *retry_count;
                    item.claimed_at = None;
                    item.claimed_by = None;
                    report.recorded_failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn count_pending(&self, job_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .queue
            .iter()
            .filter(|item| item.job_id == job_id && item.status == QueueItemStatus::Pending)
            .count())
    }

    async fn stats(&self, job_id: &str) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for item in inner.queue.iter().filter(|item| item.job_id == job_id) {
            stats.total += 1;
            match item.status {
                QueueItemStatus::Pending => {
                    stats.pending += 1;
                    if item.claimed_at.is_some() {
                        stats.claimed += 1;
                    }
                }
                QueueItemStatus::Success => stats.success += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reset_failed(&self, job_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut reset = 0;
        for item in inner.queue.iter_mut() {
            if item.job_id == job_id && item.status == QueueItemStatus::Failed {
                item.status = QueueItemStatus::Pending;
                item.last_error = None;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn list_recipients(&self, target: TargetPlan) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut emails: Vec<String> = inner
            .members
            .iter()
            .filter(|member| !member.unsubscribed)
            .filter(|member| target == TargetPlan::All || member.plan == target)
            .map(|member| member.email.to_lowercase())
            .collect();
        emails.sort();
        emails.dedup();
        Ok(emails)
    }

    async fn mark_unsubscribed(&self, email: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .members
            .iter_mut()
            .find(|member| member.email.eq_ignore_ascii_case(email.trim()))
        {
            Some(member) => {
                member.unsubscribed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Records sends; addresses in the failure set are rejected as a provider
/// 500 would be.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: HashSet<String>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(addresses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|mail| mail.to.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        if self.failing.contains(to) {
            return Err(MailError::Api {
                status: 500,
                body: "simulated provider rejection".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

/// Dispatch tunables sized for tests: no send pause, small claim batches.
pub fn dispatch_config(batch_size: usize) -> DispatchConfig {
    DispatchConfig {
        batch_size,
        send_interval: Duration::ZERO,
        execution_budget: Duration::from_secs(30),
        lease_ttl: chrono::Duration::minutes(10),
        public_base_url: "http://localhost:3000".to_string(),
    }
}

pub fn worker_over(
    store: &Arc<MemoryStore>,
    mailer: &Arc<RecordingMailer>,
    config: DispatchConfig,
) -> DispatchWorker {
    let jobs: Arc<dyn JobRegistry> = store.clone();
    let queue: Arc<dyn QueueStore> = store.clone();
    let mailer: Arc<dyn Mailer> = mailer.clone();
    DispatchWorker::new(jobs, queue, mailer, config)
}

pub fn scheduler_over(store: &Arc<MemoryStore>) -> JobScheduler {
    let jobs: Arc<dyn JobRegistry> = store.clone();
    let queue: Arc<dyn QueueStore> = store.clone();
    let directory: Arc<dyn RecipientDirectory> = store.clone();
    JobScheduler::new(jobs, queue, directory)
}

pub fn state_over(
    store: &Arc<MemoryStore>,
    mailer: &Arc<RecordingMailer>,
    config: DispatchConfig,
) -> AppState {
    let jobs: Arc<dyn JobRegistry> = store.clone();
    let queue: Arc<dyn QueueStore> = store.clone();
    let directory: Arc<dyn RecipientDirectory> = store.clone();
    let mailer: Arc<dyn Mailer> = mailer.clone();
    AppState::new(jobs, queue, directory, mailer, config, None)
}

/// In-process server on an ephemeral port, torn down on drop.
pub struct TestServer {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(state: AppState) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = newsletter_dispatch::routes::router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
