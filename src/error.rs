use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::models::api::wire_timestamp;
use crate::services::dispatch::DispatchError;
use crate::services::scheduler::ScheduleError;
use crate::store::StoreError;

/// Failed requests serialize to this envelope with a mapped status code.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    success: bool,
    timestamp: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("no recipients for job {0}")]
    NoRecipients(String),

    #[error("too many requests, retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("row store error: {0}")]
    Store(#[from] StoreError),
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::Validation(report.to_string())
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::NoRecipients(job_id) => ApiError::NoRecipients(job_id),
            ScheduleError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::JobNotFound(job_id) => {
                ApiError::NotFound(format!("job not found: {job_id}"))
            }
            DispatchError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Validation(_) | ApiError::NoRecipients(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorBody {
            error: self.to_string(),
            success: false,
            timestamp: wire_timestamp(),
        });

        let mut response = (status, body).into_response();
        if let ApiError::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("job".into()), StatusCode::NOT_FOUND),
            (
                ApiError::NoRecipients("j1".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::TooManyRequests {
                    retry_after_secs: 60,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_throttle_response_carries_retry_after() {
        let response = ApiError::TooManyRequests {
            retry_after_secs: 120,
        }
        .into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "120"
        );
    }
}
