use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Workspace error: {0}")]
    Workspace(String),
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Vectorization error: {0}")]
    Vectorization(String),
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("Runner busy: {0}")]
    Busy(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Client-caused failures: bad input rather than a broken runner.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidContentType(_)
                | Self::PayloadTooLarge(_)
                | Self::InvalidImage(_)
                | Self::Auth(_)
        )
    }
}
