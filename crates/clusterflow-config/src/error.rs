use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Cluster definition not found. Looked in:\n\
        - current directory: cluster.local.kdl, .cluster.local.kdl, cluster.kdl, .cluster.kdl\n\
        - ./.clusterflow/ directory\n\
        - ~/.config/clusterflow/cluster.kdl\n\
        Set CLUSTERFLOW_CONFIG_PATH to point at a file directly"
    )]
    ClusterFileNotFound,

    #[error("Failed to parse settings {path}: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
