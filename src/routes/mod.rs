pub mod health;
pub mod jobs;
pub mod metrics;
pub mod unsubscribe;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Application routes with the shared middleware stack.
///
/// The Prometheus scrape route is not included here; it carries its own
/// state and is attached by the server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::job_status))
        .route("/api/v1/jobs/{job_id}/dispatch", post(jobs::dispatch_job))
        .route("/api/v1/jobs/{job_id}/retry", post(jobs::retry_failed))
        .route(
            "/unsubscribe",
            get(unsubscribe::confirmation_page).post(unsubscribe::unsubscribe),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB limit
}
