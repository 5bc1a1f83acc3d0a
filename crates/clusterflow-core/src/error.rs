use crate::model::ResourceKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid resource '{resource}': {message}")]
    InvalidResource { resource: String, message: String },

    #[error("Resource '{0}' is declared more than once")]
    DuplicateResource(String),

    #[error("Resources '{other}' and '{resource}' would share the provider name '{provider_name}'")]
    NameCollision {
        resource: String,
        other: String,
        provider_name: String,
    },

    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Resource '{resource}' references '{reference}' as a {expected}, but it is a {found}")]
    WrongReferenceKind {
        resource: String,
        reference: String,
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Cluster has node pools but no master pool")]
    MissingMasterPool,
}

pub type Result<T> = std::result::Result<T, ClusterError>;
