use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::SchedulerError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// A scheduler error rendered for HTTP clients as `{"message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::NoCapacityAvailable => StatusCode::SERVICE_UNAVAILABLE,
            SchedulerError::InvalidTerminationState(_) => StatusCode::BAD_REQUEST,
            SchedulerError::JobNotFound(_) | SchedulerError::NodeNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SchedulerError::InvalidSpec(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.to_string())
    }
}

/// Malformed or mistyped request bodies get the same `{"message"}` shape as
/// every other failure.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, message = %self.message, "Request failed");
        }
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}
