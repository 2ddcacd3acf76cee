use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use garde::Validate;
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::api::{
    wire_timestamp, CreateJobRequest, CreateJobResponse, DispatchResponse, JobListResponse,
    JobStatusResponse, JobView, RetryResponse,
};
use crate::models::job::NewJob;

/// Jobs returned by the history endpoint.
const HISTORY_LIMIT: usize = 20;

/// POST /api/v1/jobs — create a job and queue its recipient snapshot.
pub async fn create_job(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    check_rate_limit(&state, &headers, peer).await?;
    request.validate()?;

    let job_id = request
        .job_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let summary = state
        .scheduler
        .schedule(NewJob {
            job_id,
            subject: request.subject,
            content: request.content,
            target_plan: request.target_plan,
        })
        .await?;

    Ok(Json(CreateJobResponse {
        success: true,
        job_id: summary.job.job_id.clone(),
        status: summary.job.status,
        target_plan: summary.job.target_plan,
        total_recipients: summary.total_recipients,
        failed_recipients: summary.failed_recipients,
        created_at: summary.job.created_at,
        queued_at: summary.job.queued_at,
    }))
}

/// GET /api/v1/jobs — recent jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.jobs.list_recent_jobs(HISTORY_LIMIT).await?;
    let jobs: Vec<JobView> = jobs.iter().map(JobView::from).collect();
    Ok(Json(JobListResponse {
        success: true,
        count: jobs.len(),
        jobs,
    }))
}

/// GET /api/v1/jobs/{job_id} — job fields plus live queue counts.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .jobs
        .find_job(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;
    let queue_stats = state.queue.stats(&job.job_id).await?;

    Ok(Json(JobStatusResponse {
        success: true,
        job: JobView::from(&job),
        queue_stats,
        timestamp: wire_timestamp(),
    }))
}

/// POST /api/v1/jobs/{job_id}/dispatch — run one dispatch cycle now.
pub async fn dispatch_job(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<DispatchResponse>, ApiError> {
    check_rate_limit(&state, &headers, peer).await?;

    let summary = state.worker.run_cycle(&job_id).await?;
    Ok(Json(DispatchResponse {
        success: true,
        job_id: summary.job_id,
        lease_id: summary.lease_id,
        total_processed: summary.processed,
        total_success: summary.succeeded,
        total_failed: summary.failed,
        remaining_count: summary.remaining,
        status: summary.status,
        execution_time: summary.elapsed.as_secs(),
        timestamp: wire_timestamp(),
    }))
}

/// POST /api/v1/jobs/{job_id}/retry — return failed rows to pending.
///
/// Job counters are left as they are; the next dispatch cycle re-counts
/// the queue and moves the job back to sending.
pub async fn retry_failed(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let job = state
        .jobs
        .find_job(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;
    let requeued = state.queue.reset_failed(&job.job_id).await?;

    let message = if requeued == 0 {
        "再送対象がありません".to_string()
    } else {
        format!("{requeued}件を再送待ちに変更しました")
    };
    Ok(Json(RetryResponse {
        success: true,
        job_id: job.job_id,
        retry_count: requeued,
        message,
    }))
}

/// Deny the request when the caller's address is over the attempt limit.
/// Limiter outages fail open.
async fn check_rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Result<(), ApiError> {
    let Some(limiter) = &state.limiter else {
        return Ok(());
    };

    let key = client_ip(headers, peer);
    match limiter.check(&key).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => {
            warn!(client = %key, "attempt limit exceeded");
            Err(ApiError::TooManyRequests {
                retry_after_secs: decision.retry_after_secs.unwrap_or(0),
            })
        }
        Err(e) => {
            warn!(error = %e, "attempt limiter unavailable, allowing request");
            Ok(())
        }
    }
}

/// First hop of x-forwarded-for when present, else the peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}
