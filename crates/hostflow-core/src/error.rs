//! Error types for the host lifecycle core

use crate::host::InvalidTransition;
use hostflow_cloud::CloudError;
use thiserror::Error;

/// Persistence layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Host already exists: {0}")]
    AlreadyExists(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The four ways a job execution can fail.
///
/// Every provider or storage failure is translated into exactly one of these
/// before it leaves a job; the dispatcher's retry policy keys on [`JobErrorKind`].
#[derive(Error, Debug)]
pub enum JobError {
    #[error("precondition failed for host {host_id}: {message}")]
    Precondition { host_id: String, message: String },

    #[error("provider error: {0}")]
    Provider(#[from] CloudError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("host not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorKind {
    Precondition,
    Provider,
    Persistence,
    NotFound,
}

impl std::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobErrorKind::Precondition => write!(f, "precondition"),
            JobErrorKind::Provider => write!(f, "provider"),
            JobErrorKind::Persistence => write!(f, "persistence"),
            JobErrorKind::NotFound => write!(f, "not-found"),
        }
    }
}

impl JobError {
    pub fn precondition(host_id: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Precondition {
            host_id: host_id.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::Precondition { .. } => JobErrorKind::Precondition,
            JobError::Provider(_) => JobErrorKind::Provider,
            JobError::Persistence(_) => JobErrorKind::Persistence,
            JobError::NotFound(_) => JobErrorKind::NotFound,
        }
    }

    /// Provider and persistence failures are worth another attempt;
    /// precondition failures and missing hosts are not. Neither are provider
    /// failures that no retry can change, such as a vanished instance or a
    /// bad configuration.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Provider(e) => !matches!(
                e,
                CloudError::InstanceNotFound(_)
                    | CloudError::ProviderNotFound(_)
                    | CloudError::AuthenticationFailed(_)
                    | CloudError::InvalidConfig(_)
            ),
            JobError::Persistence(_) => true,
            JobError::Precondition { .. } | JobError::NotFound(_) => false,
        }
    }
}

impl From<InvalidTransition> for JobError {
    fn from(err: InvalidTransition) -> Self {
        JobError::precondition(err.host_id.clone(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let provider = JobError::from(CloudError::ApiError("500".to_string()));
        let storage = JobError::from(StoreError::Unavailable("down".to_string()));
        let precondition = JobError::precondition("h1", "host is stopped");
        let missing = JobError::NotFound("h1".to_string());

        assert!(provider.is_retryable());
        assert!(storage.is_retryable());
        assert!(!precondition.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!JobError::from(CloudError::InstanceNotFound("h1".to_string())).is_retryable());
        assert!(!JobError::from(CloudError::InvalidConfig("zone".to_string())).is_retryable());
        assert!(JobError::from(CloudError::Cancelled("stop h1".to_string())).is_retryable());
        assert_eq!(precondition.kind(), JobErrorKind::Precondition);
        assert_eq!(
            precondition.to_string(),
            "precondition failed for host h1: host is stopped"
        );
    }
}
