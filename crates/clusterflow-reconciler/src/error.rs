use clusterflow_bootstrap::BootstrapError;
use clusterflow_cloud::{CloudError, Diff};
use clusterflow_core::{ClusterError, ResourceKind};
use thiserror::Error;

/// Exit status for configuration errors found before any provider call
pub const EXIT_CONFIG: i32 = 2;

/// Exit status for a run that started and failed
pub const EXIT_FAILURE: i32 = 1;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Definition(#[from] ClusterError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("{provider} cannot manage {kind} resources ('{resource}')")]
    UnsupportedKind {
        resource: String,
        kind: ResourceKind,
        provider: String,
    },

    #[error("{provider} cannot realise this definition: {source}")]
    ProviderRestriction {
        provider: String,
        #[source]
        source: CloudError,
    },

    #[error("Cluster '{0}' already exists; use apply to change it")]
    ClusterExists(String),

    #[error("Cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("Failed to read state of '{resource}': {source}")]
    Query {
        resource: String,
        #[source]
        source: CloudError,
    },

    #[error("Failed to apply {diff} to '{resource}': {source}{}", retry_note(.retry_safe))]
    Apply {
        resource: String,
        diff: Diff,
        retry_safe: bool,
        #[source]
        source: CloudError,
    },

    #[error(
        "'{resource}' drifted outside clusterflow in immutable field(s): {}",
        join_fields(.fields)
    )]
    Drift {
        resource: String,
        fields: Vec<String>,
    },

    /// Rendering failed after earlier resources were already applied
    #[error("Failed to render the bootstrap payload of '{resource}': {source}")]
    Payload {
        resource: String,
        #[source]
        source: BootstrapError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("State error: {0}")]
    State(#[source] CloudError),
}

fn retry_note(retry_safe: &bool) -> &'static str {
    if *retry_safe {
        " (safe to re-run)"
    } else {
        " (NOT safe to re-run blindly: the old object may already be deleted)"
    }
}

fn join_fields(fields: &[String]) -> String {
    fields.join(", ")
}

impl ReconcileError {
    /// Whether the error was detected before any provider call
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ReconcileError::Definition(_)
                | ReconcileError::Bootstrap(_)
                | ReconcileError::UnsupportedKind { .. }
                | ReconcileError::ProviderRestriction { .. }
                | ReconcileError::ClusterExists(_)
                | ReconcileError::ClusterNotFound(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_config() {
            EXIT_CONFIG
        } else {
            EXIT_FAILURE
        }
    }

    /// Whether simply re-running the same command is safe
    pub fn retry_safe(&self) -> bool {
        match self {
            ReconcileError::Apply { retry_safe, .. } => *retry_safe,
            ReconcileError::Drift { .. } => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
