//! Sakura Cloud provider error types

use hostflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SakuraError {
    #[error("usacloud not found. Please install: brew install usacloud")]
    UsacloudNotFound,

    #[error("usacloud authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("usacloud command failed: {0}")]
    CommandFailed(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Resource creation failed: {0}")]
    CreationFailed(String),

    #[error("usacloud command cancelled: {0}")]
    Cancelled(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<SakuraError> for CloudError {
    fn from(err: SakuraError) -> Self {
        match err {
            SakuraError::ServerNotFound(id) => CloudError::InstanceNotFound(id),
            SakuraError::Cancelled(what) => CloudError::Cancelled(what),
            SakuraError::AuthenticationFailed(msg) => CloudError::AuthenticationFailed(msg),
            SakuraError::CommandFailed(msg) => CloudError::CommandFailed(msg),
            SakuraError::CreationFailed(msg) => CloudError::ApiError(msg),
            SakuraError::UsacloudNotFound | SakuraError::InvalidPlan(_) => {
                CloudError::InvalidConfig(err.to_string())
            }
            SakuraError::JsonError(e) => CloudError::Json(e),
            SakuraError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SakuraError>;
