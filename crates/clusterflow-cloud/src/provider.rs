//! Cloud provider trait definition

use crate::diff::FieldSet;
use crate::error::Result;
use crate::resource::{CreateRequest, Filter, ResourceState};
use async_trait::async_trait;
use clusterflow_core::{Cluster, ResourceKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capability interface every cloud provider implements.
///
/// The reconciler only talks to providers through this trait. All calls are
/// keyed by the deterministic names and tags from
/// [`clusterflow_core::naming`], which is what lets a retried `create` find
/// and adopt an object left behind by an earlier, interrupted run.
///
/// Server pools are handled per instance: `describe` returns one state per
/// instance, `create` launches exactly one instance and `delete` removes one.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name (e.g. "sakura-cloud", "digitalocean")
    fn name(&self) -> &str;

    /// Provider display name for UI
    fn display_name(&self) -> &str;

    /// Check that credentials are present and valid
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Resource kinds this provider can manage
    fn supported_kinds(&self) -> &[ResourceKind];

    fn supports(&self, kind: ResourceKind) -> bool {
        self.supported_kinds().contains(&kind)
    }

    /// Reject definitions this provider cannot realise even though every
    /// kind in them is supported. Called before any provider call.
    fn check_cluster(&self, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }

    /// Query existing objects of one kind. An empty result is not an error.
    async fn describe(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<ResourceState>>;

    /// Create one object (one instance for server pools)
    async fn create(&self, request: &CreateRequest) -> Result<ResourceState>;

    /// Finish an object found by name after a create whose response was
    /// lost, so it ends up as `create` would have left it
    async fn adopt(&self, _request: &CreateRequest, existing: ResourceState) -> Result<ResourceState> {
        Ok(existing)
    }

    /// Change the given fields of an existing object in place
    async fn update(
        &self,
        kind: ResourceKind,
        identity: &str,
        changes: &FieldSet,
    ) -> Result<ResourceState>;

    /// Delete an object. Deleting something that is already gone succeeds.
    async fn delete(&self, kind: ResourceKind, identity: &str) -> Result<()>;

    /// Everything this provider holds for a cluster
    async fn list(&self, cluster: &str) -> Result<Vec<ResourceState>> {
        let filter = Filter::cluster(cluster);
        let mut all = Vec::new();
        for kind in self.supported_kinds() {
            all.extend(self.describe(*kind, &filter).await?);
        }
        Ok(all)
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts; used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();

        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let retry = RetryConfig::immediate(5);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for(4), Duration::ZERO);
    }

    #[test]
    fn test_auth_status() {
        let ok = AuthStatus::ok("team@example");
        assert!(ok.authenticated);
        assert!(ok.error.is_none());

        let failed = AuthStatus::failed("token missing");
        assert!(!failed.authenticated);
        assert_eq!(failed.error.as_deref(), Some("token missing"));
    }
}
