//! Locked, snapshot-backed operations on one cluster

use crate::error::{ReconcileError, Result};
use crate::reconciler::{Reconciler, RunReport};
use clusterflow_cloud::{Plan, StateSnapshot, StateStore};
use clusterflow_core::Cluster;
use std::sync::Arc;
use tracing::{info, instrument};

/// Pairs a [`Reconciler`] with the store holding the last converged snapshot.
///
/// Every mutating operation holds the cluster lock for its whole duration and
/// writes the snapshot only when the run succeeded.
pub struct ClusterSession {
    reconciler: Reconciler,
    store: Arc<dyn StateStore>,
}

impl ClusterSession {
    pub fn new(reconciler: Reconciler, store: Arc<dyn StateStore>) -> Self {
        Self { reconciler, store }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Bring up a cluster that has no snapshot yet
    #[instrument(skip_all, fields(cluster = %desired.name))]
    pub async fn create(&self, desired: &Cluster) -> Result<RunReport> {
        self.reconciler.preflight(desired)?;
        let lock = self.store.lock(&desired.name).await.map_err(ReconcileError::State)?;

        if self.snapshot(&desired.name).await?.is_some() {
            return Err(ReconcileError::ClusterExists(desired.name.clone()));
        }

        let report = self.reconciler.reconcile(desired, None).await?;
        self.persist(&report.cluster).await?;
        lock.release().await.map_err(ReconcileError::State)?;
        Ok(report)
    }

    /// Converge an existing (or partially created) cluster onto `desired`
    #[instrument(skip_all, fields(cluster = %desired.name))]
    pub async fn apply(&self, desired: &Cluster) -> Result<RunReport> {
        self.reconciler.preflight(desired)?;
        let lock = self.store.lock(&desired.name).await.map_err(ReconcileError::State)?;

        let baseline = self.snapshot(&desired.name).await?.map(|s| s.cluster);
        let report = self.reconciler.reconcile(desired, baseline.as_ref()).await?;
        self.persist(&report.cluster).await?;
        lock.release().await.map_err(ReconcileError::State)?;
        Ok(report)
    }

    /// Tear a cluster down and forget its snapshot.
    ///
    /// The snapshot is preferred since it carries identities. Resources only
    /// the definition names are torn down too, since a failed run may have
    /// created them without persisting. Whatever has no identity is found
    /// through its tags.
    #[instrument(skip_all, fields(cluster = %name))]
    pub async fn destroy(&self, name: &str, definition: Option<&Cluster>) -> Result<Plan> {
        let lock = self.store.lock(name).await.map_err(ReconcileError::State)?;

        let cluster = match (self.snapshot(name).await?, definition) {
            (Some(snapshot), Some(definition)) => {
                let mut cluster = snapshot.cluster;
                cluster.absorb_missing(definition);
                cluster
            }
            (Some(snapshot), None) => snapshot.cluster,
            (None, Some(definition)) => definition.clone(),
            (None, None) => return Err(ReconcileError::ClusterNotFound(name.to_string())),
        };

        let plan = self.reconciler.destroy(&cluster).await?;
        self.store.delete(name).await.map_err(ReconcileError::State)?;
        info!("Snapshot removed");
        lock.release().await.map_err(ReconcileError::State)?;
        Ok(plan)
    }

    /// Diff `desired` against the provider without changing anything
    pub async fn plan(&self, desired: &Cluster) -> Result<Plan> {
        let baseline = self.snapshot(&desired.name).await?.map(|s| s.cluster);
        self.reconciler.plan(desired, baseline.as_ref()).await
    }

    /// Last converged snapshot
    pub async fn get(&self, name: &str) -> Result<StateSnapshot> {
        self.snapshot(name)
            .await?
            .ok_or_else(|| ReconcileError::ClusterNotFound(name.to_string()))
    }

    async fn snapshot(&self, name: &str) -> Result<Option<StateSnapshot>> {
        self.store.get(name).await.map_err(ReconcileError::State)
    }

    async fn persist(&self, cluster: &Cluster) -> Result<()> {
        self.store
            .put(&StateSnapshot::new(cluster.clone()))
            .await
            .map_err(ReconcileError::State)?;
        info!(resources = cluster.resources.len(), "Snapshot written");
        Ok(())
    }
}
