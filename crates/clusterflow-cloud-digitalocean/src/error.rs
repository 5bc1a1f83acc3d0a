//! DigitalOcean provider error types

use clusterflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigitalOceanError {
    #[error("DigitalOcean API token is missing (set DIGITALOCEAN_TOKEN)")]
    MissingToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DigitalOcean API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Droplet {0} did not become active in time")]
    NotActive(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Firewall '{firewall}' has a rule on ports '{ports}', which clusterflow cannot represent")]
    UnsupportedPorts { firewall: String, ports: String },

    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DigitalOceanError>;

impl From<DigitalOceanError> for CloudError {
    fn from(err: DigitalOceanError) -> Self {
        match err {
            DigitalOceanError::MissingToken => CloudError::InvalidConfig(err.to_string()),
            DigitalOceanError::Http(e) if e.is_timeout() => CloudError::Timeout(e.to_string()),
            DigitalOceanError::Http(e) if e.is_connect() || e.is_request() => {
                CloudError::Network(e.to_string())
            }
            DigitalOceanError::Http(e) => match e.status() {
                Some(status) => CloudError::from_status(status.as_u16(), e.to_string()),
                None => CloudError::Network(e.to_string()),
            },
            DigitalOceanError::Api { status: 422, message }
                if message.to_lowercase().contains("limit") =>
            {
                CloudError::QuotaExceeded(message)
            }
            DigitalOceanError::Api { status, message } => CloudError::from_status(status, message),
            DigitalOceanError::NotActive(id) => {
                CloudError::Timeout(format!("droplet {id} is not active yet"))
            }
            DigitalOceanError::InvalidIdentity(id) => CloudError::InvalidRequest(id),
            DigitalOceanError::UnsupportedPorts { .. } => CloudError::Unsupported(err.to_string()),
            DigitalOceanError::InvalidSubnet(message) => CloudError::InvalidRequest(message),
            DigitalOceanError::JsonError(e) => CloudError::Json(e),
        }
    }
}
