use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use shared::models::ReplayError;
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::services::feed::FeedError;

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn invalid_speed(speed: f64) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_speed",
            "speed must be a positive, finite number",
        )
        .with_details(json!({ "speed": speed.to_string() }))
    }

    pub fn no_data() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "no_data",
            "no trip data is loaded; nothing to play",
        )
    }

    pub fn malformed_data(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "malformed_data", message)
    }

    pub fn stream_setup_failed(err: &FeedError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "stream_setup_failed",
            err.to_string(),
        )
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = self.details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::InvalidSpeed(speed) => Self::invalid_speed(speed),
            ReplayError::MalformedData(inner) => Self::malformed_data(inner.to_string()),
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(err: FeedError) -> Self {
        match &err {
            _ if err.is_not_found() => Self::not_found(err.to_string()),
            FeedError::Read { .. } => Self::internal_server_error(err.to_string()),
            FeedError::Parse { .. } | FeedError::UnexpectedShape { .. } | FeedError::Malformed { .. } => {
                Self::malformed_data(err.to_string())
            }
        }
    }
}
