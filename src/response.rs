use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::memory::{EstimatorError, RecommendError};
use crate::service::ServiceError;
use crate::workers::WorkerError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<SuccessResponse<T>> {
    Json(SuccessResponse {
        success: true,
        data,
    })
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::operational(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            error!(code = %self.code, error = %self.message, "Internal error");
            "internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => Self::validation(message),
            ServiceError::History(e) => Self::unavailable(format!("review history unavailable: {e}")),
            ServiceError::Store(e) => Self::unavailable(format!("parameter store unavailable: {e}")),
            ServiceError::Estimator(EstimatorError::Contention { user_id, attempts }) => {
                Self::conflict(format!(
                    "concurrent lambda updates for {user_id}, gave up after {attempts} attempts"
                ))
            }
            ServiceError::Estimator(EstimatorError::NoEvents) => {
                Self::validation("no review events to recalibrate from")
            }
            ServiceError::Estimator(EstimatorError::Store(e)) => {
                Self::unavailable(format!("parameter store unavailable: {e}"))
            }
            ServiceError::Recommend(RecommendError::Store(e)) => {
                Self::unavailable(format!("parameter store unavailable: {e}"))
            }
            ServiceError::Recommend(e @ RecommendError::EmptyCandidates) => Self::internal(e.to_string()),
        }
    }
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Disabled => Self::operational(
                StatusCode::SERVICE_UNAVAILABLE,
                "SCANNER_DISABLED",
                "due-item scanner is disabled",
            ),
            WorkerError::Scheduler(e) => Self::internal(e.to_string()),
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError::operational(status, code, message)
}
