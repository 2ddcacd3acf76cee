use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub row_store: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health — dependency checks with latencies.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // One cheap read against the jobs table.
    let start = std::time::Instant::now();
    let store_check = match state.jobs.list_recent_jobs(1).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    // Redis backs only the attempt limiter and may be absent.
    let redis_check = match &state.limiter {
        Some(limiter) => {
            let redis_start = std::time::Instant::now();
            match limiter.health_check().await {
                Ok(()) => ComponentHealth {
                    status: "ok".to_string(),
                    latency_ms: Some(redis_start.elapsed().as_millis() as u64),
                },
                Err(_) => ComponentHealth {
                    status: "error".to_string(),
                    latency_ms: None,
                },
            }
        }
        None => ComponentHealth {
            status: "disabled".to_string(),
            latency_ms: None,
        },
    };

    let all_healthy = store_check.status == "ok" && redis_check.status != "error";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            row_store: store_check,
            redis: redis_check,
        },
    };

    (status_code, Json(response))
}
