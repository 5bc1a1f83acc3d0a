//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors.
///
/// Variants are split into transient failures, which the reconciler retries
/// with backoff, and permanent ones, which fail the run immediately.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Throttled by provider: {0}")]
    Throttled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource kind '{0}' is not supported by this provider")]
    Unsupported(String),

    #[error("Ambiguous resource: {0}")]
    Conflict(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Classify an HTTP status returned by a provider API
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => CloudError::AuthenticationFailed(message),
            403 => CloudError::PermissionDenied(message),
            404 => CloudError::NotFound(message),
            408 => CloudError::Timeout(message),
            409 | 422 => CloudError::InvalidRequest(message),
            429 => CloudError::Throttled(message),
            _ => CloudError::Api { status, message },
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Throttled(_) | CloudError::Timeout(_) | CloudError::Network(_) => true,
            CloudError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
