//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider not registered: {0}")]
    ProviderNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// The backend reported that the instance does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::InstanceNotFound(_))
    }

    /// Failures worth retrying in place. Cancellation and configuration
    /// problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::ApiError(_)
                | CloudError::CommandFailed(_)
                | CloudError::Timeout(_)
                | CloudError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
