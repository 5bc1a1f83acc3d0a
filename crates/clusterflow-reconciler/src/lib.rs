//! ClusterFlow reconciler
//!
//! Walks the dependency graph of a cluster, diffs each resource against what
//! the provider reports and applies the difference. Transient provider errors
//! are retried with backoff; the first permanent error stops the run.

pub mod error;
pub mod reconciler;
pub mod retry;
pub mod session;

pub use error::{EXIT_CONFIG, EXIT_FAILURE, ReconcileError, Result};
pub use reconciler::{ReconcileOptions, Reconciler, ResourcePhase, RunReport, RunStatus};
pub use retry::{RetryFailure, with_retry};
pub use session::ClusterSession;
