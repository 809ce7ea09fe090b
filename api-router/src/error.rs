use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;
use vectorize_pipeline::JobFailure;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service busy: {0}")]
    ServiceBusy(String),

    #[error("Job {job_id} failed: {cause}")]
    JobFailed {
        job_id: String,
        duration_ms: u64,
        cause: Box<ApiError>,
    },
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::InvalidContentType(_)
            | AppError::PayloadTooLarge(_)
            | AppError::InvalidImage(_) => Self::ValidationError(err.to_string()),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::Busy(msg) => Self::ServiceBusy(msg),
            AppError::Workspace(_)
            | AppError::Fetch(_)
            | AppError::Vectorization(_)
            | AppError::Upload(_) => Self::InternalError(err.to_string()),
            AppError::Join(_)
            | AppError::Io(_)
            | AppError::Reqwest(_)
            | AppError::Anyhow(_)
            | AppError::InternalError(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<JobFailure> for ApiError {
    fn from(failure: JobFailure) -> Self {
        Self::JobFailed {
            job_id: failure.job_id,
            duration_ms: failure.duration_ms,
            cause: Box::new(Self::from(failure.error)),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ServiceBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::JobFailed { cause, .. } => cause.status_code(),
        }
    }

    fn into_body(self) -> ErrorResponse {
        match self {
            Self::InternalError(message)
            | Self::ValidationError(message)
            | Self::Unauthorized(message)
            | Self::ServiceBusy(message) => ErrorResponse {
                error: message,
                status: "error".to_string(),
                job_id: None,
                duration_ms: None,
            },
            Self::JobFailed {
                job_id,
                duration_ms,
                cause,
            } => ErrorResponse {
                job_id: Some(job_id),
                duration_ms: Some(duration_ms),
                ..(*cause).into_body()
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.into_body())).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}
