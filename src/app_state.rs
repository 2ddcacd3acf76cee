use std::sync::Arc;

use crate::services::dispatch::{DispatchConfig, DispatchWorker};
use crate::services::mailer::Mailer;
use crate::services::rate_limit::RateLimiter;
use crate::services::scheduler::JobScheduler;
use crate::store::{JobRegistry, QueueStore, RecipientDirectory};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobRegistry>,
    pub queue: Arc<dyn QueueStore>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub scheduler: Arc<JobScheduler>,
    pub worker: Arc<DispatchWorker>,
    /// Absent when no Redis is configured; throttled endpoints then pass
    /// requests through.
    pub limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        queue: Arc<dyn QueueStore>,
        directory: Arc<dyn RecipientDirectory>,
        mailer: Arc<dyn Mailer>,
        dispatch: DispatchConfig,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new(
            jobs.clone(),
            queue.clone(),
            directory.clone(),
        ));
        let worker = Arc::new(DispatchWorker::new(
            jobs.clone(),
            queue.clone(),
            mailer,
            dispatch,
        ));
        Self {
            jobs,
            queue,
            directory,
            scheduler,
            worker,
            limiter: limiter.map(Arc::new),
        }
    }
}
