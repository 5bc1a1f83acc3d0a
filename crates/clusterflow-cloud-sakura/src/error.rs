//! Sakura Cloud provider error types

use clusterflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SakuraError {
    #[error("usacloud not found. Please install: brew install usacloud")]
    UsacloudNotFound,

    #[error("usacloud authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("usacloud command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid server size '{0}', expected e.g. 2core-4gb")]
    InvalidSize(String),

    #[error("Server '{server}' references {count} packet filters, Sakura Cloud binds one per interface")]
    TooManyPacketFilters { server: String, count: usize },

    #[error("Unexpected usacloud output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SakuraError>;

impl From<SakuraError> for CloudError {
    fn from(err: SakuraError) -> Self {
        match err {
            SakuraError::UsacloudNotFound => CloudError::InvalidConfig(err.to_string()),
            SakuraError::AuthenticationFailed(msg) => CloudError::AuthenticationFailed(msg),
            SakuraError::CommandFailed(stderr) => classify_stderr(stderr),
            SakuraError::InvalidSize(_) => CloudError::InvalidRequest(err.to_string()),
            SakuraError::TooManyPacketFilters { .. } => CloudError::Unsupported(err.to_string()),
            SakuraError::UnexpectedOutput(msg) => CloudError::CommandFailed(msg),
            SakuraError::JsonError(e) => CloudError::Json(e),
            SakuraError::IoError(e) => CloudError::Io(e),
        }
    }
}

/// Map usacloud's stderr onto the transient/permanent split.
///
/// usacloud reports the API status inside its message, e.g.
/// `Error: ... [429 Too Many Requests] ...`.
fn classify_stderr(stderr: String) -> CloudError {
    let lower = stderr.to_lowercase();
    let status = [401u16, 403, 404, 409, 429, 500, 502, 503, 504]
        .into_iter()
        .find(|code| {
            lower.contains(&format!("[{code}"))
                || lower.contains(&format!("status {code}"))
                || lower.contains(&format!(" {code} "))
        });

    match status {
        Some(status) => CloudError::from_status(status, stderr.trim()),
        None if lower.contains("timeout") || lower.contains("timed out") => {
            CloudError::Timeout(stderr.trim().to_string())
        }
        None if lower.contains("connection refused") || lower.contains("connection reset") => {
            CloudError::Network(stderr.trim().to_string())
        }
        None if lower.contains("not found") => CloudError::NotFound(stderr.trim().to_string()),
        None => CloudError::CommandFailed(stderr.trim().to_string()),
    }
}
