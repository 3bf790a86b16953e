use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(error: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            error: self.message,
        };
        let status = self.status;
        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

/// Storage faults always propagate as a 5xx, never swallowed; domain errors
/// get their own status so callers can distinguish "not found" from "not
/// allowed right now" from "the database is down".
impl From<orchestration_core::OrchestratorError> for AppError {
    fn from(error: orchestration_core::OrchestratorError) -> Self {
        use orchestration_core::OrchestratorError::*;
        let status = match &error {
            ExperimentNotFound(_) => StatusCode::NOT_FOUND,
            ExperimentExists(_) | InvalidTransition(_, _) => StatusCode::CONFLICT,
            UnknownConnector(_) => StatusCode::SERVICE_UNAVAILABLE,
            InvalidConfiguration(_) | MissingSecret(_) | ConfigIo { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Graph(_) => StatusCode::BAD_REQUEST,
            Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}
