//! Cloud lifecycle error types and ApiError mapping
//!
//! Maps kube-rs and storage failures to cloudfleet API errors for consistent
//! error handling.

use crate::error::ApiError;
use thiserror::Error;

/// Errors raised by the cloud lifecycle subsystem
#[derive(Debug, Error)]
pub enum CloudError {
    /// Missing or malformed input; nothing was touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential invalid or cluster unreachable
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Storage operation failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Cloud record not found
    #[error("Cloud not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency or already-exists conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No live client registered for the cloud
    #[error("Cloud not connected: {0}")]
    ClusterNotConnected(String),

    /// Credential encryption or decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Deployment task failed or was cancelled
    #[error("Deploy error: {0}")]
    Deploy(String),

    /// Error from kube-rs client
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloudError {
    /// Whether this error reports an object that already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            CloudError::Conflict(_) => true,
            CloudError::Kube(kube::Error::Api(resp)) => {
                resp.code == 409 || resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for CloudError {
    fn from(err: sqlx::Error) -> Self {
        CloudError::Persistence(err.to_string())
    }
}

impl From<cloudfleet_common::Error> for CloudError {
    fn from(err: cloudfleet_common::Error) -> Self {
        match err {
            cloudfleet_common::Error::Validation(msg) => CloudError::Validation(msg),
            other => CloudError::Internal(other.to_string()),
        }
    }
}

impl From<CloudError> for ApiError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Validation(msg) => ApiError::ValidationError(msg),
            CloudError::Connectivity(msg) => {
                ApiError::BadRequest(format!("Cluster unreachable: {}", msg))
            }
            CloudError::Persistence(msg) => ApiError::Internal(format!("Storage error: {}", msg)),
            CloudError::NotFound(id) => ApiError::NotFound(format!("Cloud '{}' not found", id)),
            CloudError::Conflict(msg) => ApiError::Conflict(msg),
            CloudError::ClusterNotConnected(msg) => ApiError::ServiceUnavailable(msg),
            CloudError::Encryption(msg) => ApiError::Internal(format!("Encryption error: {}", msg)),
            CloudError::Deploy(msg) => ApiError::Internal(format!("Deploy error: {}", msg)),
            CloudError::Kube(e) => {
                let err_str = e.to_string();
                match &e {
                    kube::Error::Api(resp) => match resp.code {
                        401 => ApiError::AuthenticationFailed,
                        403 => ApiError::Forbidden(err_str),
                        404 => ApiError::NotFound(err_str),
                        409 => ApiError::Conflict(err_str),
                        422 => ApiError::ValidationError(err_str),
                        _ => ApiError::Internal(format!("Kubernetes error: {}", err_str)),
                    },
                    _ => ApiError::Internal(format!("Kubernetes error: {}", err_str)),
                }
            }
            CloudError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Result type alias for cloud lifecycle operations
pub type CloudResult<T> = std::result::Result<T, CloudError>;
