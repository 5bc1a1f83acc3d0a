//! The reconciliation loop
//!
//! Resources are visited one at a time in dependency order. For each one the
//! provider is asked for its actual state, the expected state is projected
//! from the working cluster, and the diff between them is applied. Provider
//! identities learned on the way are merged into the working cluster, which
//! becomes the snapshot candidate once every resource converged.

use crate::error::{ReconcileError, Result};
use crate::retry::{RetryFailure, with_retry};
use clusterflow_bootstrap::{BootstrapInjector, BootstrapVars};
use clusterflow_cloud::{
    CloudProvider, CreateRequest, Diff, Filter, Plan, ResourceModel, ResourceState, RetryConfig,
    compute_diff, drifted_fields,
};
use clusterflow_core::{
    Cluster, ClusterError, DependencyGraph, Instance, Resource, ResourceKind, ResourceSpec, naming,
    validate,
};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub retry: RetryConfig,

    /// Upper bound on parallel per-instance calls inside one server pool
    pub concurrency: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    Pending,
    Diffing,
    Applying,
    Converged,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The converged cluster, identities filled in
    pub cluster: Cluster,

    /// Diff of every resource in the order it was applied
    pub plan: Plan,

    pub status: RunStatus,

    pub phases: Vec<(String, ResourcePhase)>,
}

/// Run and per-resource state machine
#[derive(Debug)]
struct RunTracker {
    status: RunStatus,
    phases: Vec<(String, ResourcePhase)>,
}

impl RunTracker {
    fn new(order: &[String]) -> Self {
        Self {
            status: RunStatus::NotStarted,
            phases: order
                .iter()
                .map(|name| (name.clone(), ResourcePhase::Pending))
                .collect(),
        }
    }

    fn start(&mut self) {
        self.status = RunStatus::InProgress;
        info!(resources = self.phases.len(), "Run started");
    }

    fn enter(&mut self, name: &str, phase: ResourcePhase) {
        if let Some(entry) = self.phases.iter_mut().find(|(n, _)| n == name) {
            entry.1 = phase;
        }
        debug!(resource = name, phase = ?phase, "Resource phase");
    }

    fn finish(&mut self, status: RunStatus) {
        self.status = status;
        let converged = self
            .phases
            .iter()
            .filter(|(_, p)| *p == ResourcePhase::Converged)
            .count();
        info!(status = ?status, converged, total = self.phases.len(), "Run finished");
    }
}

/// Drives a cluster towards its definition through one provider
pub struct Reconciler {
    provider: Arc<dyn CloudProvider>,
    injector: BootstrapInjector,
    options: ReconcileOptions,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        injector: BootstrapInjector,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            provider,
            injector,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    /// Checks that need no provider call. Returns the creation order.
    pub fn preflight(&self, cluster: &Cluster) -> Result<Vec<String>> {
        let order = validate(cluster)?;
        self.check_supported(cluster)?;
        self.provider
            .check_cluster(cluster)
            .map_err(|source| ReconcileError::ProviderRestriction {
                provider: self.provider.display_name().to_string(),
                source,
            })?;
        for (name, pool) in cluster.server_pools() {
            self.injector.validate(&pool.bootstrap).map_err(|e| {
                warn!(resource = name, template = %pool.bootstrap, "Bootstrap template unusable");
                e
            })?;
        }
        Ok(order)
    }

    fn check_supported(&self, cluster: &Cluster) -> Result<()> {
        for resource in &cluster.resources {
            if !self.provider.supports(resource.kind()) {
                return Err(ReconcileError::UnsupportedKind {
                    resource: resource.name.clone(),
                    kind: resource.kind(),
                    provider: self.provider.display_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Working copy of the definition, carrying over what the baseline
    /// learned and a join token
    fn prepare(&self, desired: &Cluster, baseline: Option<&Cluster>) -> Cluster {
        let mut working = desired.clone();
        if let Some(baseline) = baseline {
            working.inherit_from(baseline);
        }
        if working.join_token.is_none() {
            let seed = working
                .key_pair()
                .and_then(|r| match &r.spec {
                    ResourceSpec::KeyPair(key) => Some(key.public_key.trim()),
                    _ => None,
                })
                .unwrap_or_default();
            working.join_token = Some(naming::derive_join_token(&working.name, seed));
        }
        working
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("Cancellation requested, not starting further work");
            return Err(ReconcileError::Cancelled);
        }
        Ok(())
    }

    /// Converge the provider onto `desired`.
    ///
    /// Resources present in `baseline` but no longer declared are deleted
    /// once everything declared has converged. Nothing is persisted here.
    #[instrument(skip_all, fields(cluster = %desired.name, provider = %self.provider.name()))]
    pub async fn reconcile(
        &self,
        desired: &Cluster,
        baseline: Option<&Cluster>,
    ) -> Result<RunReport> {
        let order = self.preflight(desired)?;
        let mut working = self.prepare(desired, baseline);

        let mut run = RunTracker::new(&order);
        run.start();

        match self.converge(&mut working, &order, baseline, &mut run).await {
            Ok(plan) => {
                run.finish(RunStatus::Succeeded);
                info!(summary = %plan.summary(), "Cluster converged");
                Ok(RunReport {
                    cluster: working,
                    plan,
                    status: run.status,
                    phases: run.phases,
                })
            }
            Err(e) => {
                run.finish(RunStatus::Failed);
                Err(e)
            }
        }
    }

    async fn converge(
        &self,
        working: &mut Cluster,
        order: &[String],
        baseline: Option<&Cluster>,
        run: &mut RunTracker,
    ) -> Result<Plan> {
        let mut plan = Plan::empty();

        for name in order {
            self.check_cancelled()?;
            let (kind, diff) = self.reconcile_resource(working, name, baseline, run).await?;
            plan.push(name, kind, diff);
        }

        if let Some(baseline) = baseline {
            for resource in removed_resources(baseline, working)? {
                self.check_cancelled()?;
                if self.delete_resource(baseline, resource).await? {
                    plan.push(&resource.name, resource.kind(), Diff::Delete);
                }
            }
        }

        Ok(plan)
    }

    async fn reconcile_resource(
        &self,
        working: &mut Cluster,
        name: &str,
        baseline: Option<&Cluster>,
        run: &mut RunTracker,
    ) -> Result<(ResourceKind, Diff)> {
        let resource = working
            .resource(name)
            .cloned()
            .ok_or_else(|| ClusterError::InvalidConfig(format!("unknown resource '{name}'")))?;
        let kind = resource.kind();

        run.enter(name, ResourcePhase::Diffing);
        let actual = resource
            .actual(self.provider.as_ref(), working)
            .await
            .map_err(|source| ReconcileError::Query {
                resource: name.to_string(),
                source,
            })?;
        let expected = resource.expected(working);
        let diff = compute_diff(actual.as_ref(), &expected);
        debug!(resource = name, diff = %diff, "Computed diff");

        if let Some(actual) = &actual {
            if let Diff::Replace(_) = diff {
                check_drift(&resource, actual, &expected, baseline)?;
            }
            if kind != ResourceKind::ServerPool
                && let Some(known) = &resource.identity
                && *known != actual.identity
            {
                warn!(
                    resource = name,
                    snapshot = %known,
                    found = %actual.identity,
                    "Adopting object whose identity differs from the snapshot"
                );
            }
        }

        if diff.is_change() {
            run.enter(name, ResourcePhase::Applying);
            info!(resource = name, kind = %kind, diff = %diff, "Applying");
        }

        let converged = if kind == ResourceKind::ServerPool {
            self.apply_pool(working, &resource, actual, &diff).await?
        } else {
            self.apply_single(working, &resource, actual, &diff).await?
        };

        resource.render(working, &converged);
        run.enter(name, ResourcePhase::Converged);
        Ok((kind, diff))
    }

    async fn apply_single(
        &self,
        working: &Cluster,
        resource: &Resource,
        actual: Option<ResourceState>,
        diff: &Diff,
    ) -> Result<ResourceState> {
        let Some(actual) = actual else {
            let request = resource.create_request(working, None, None);
            return self.create(&request, diff).await;
        };

        match diff {
            Diff::NoChange | Diff::Create => Ok(actual),
            Diff::Update(fields) => {
                let label = format!("update {}", resource.name);
                let state = with_retry(&self.options.retry, &self.cancel, &label, || {
                    self.provider.update(resource.kind(), &actual.identity, fields)
                })
                .await
                .map_err(|f| apply_error(&resource.name, diff, f))?;
                Ok(state.with_name(&resource.name))
            }
            Diff::Replace(_) => {
                self.delete_one(&resource.name, resource.kind(), &actual.identity, diff)
                    .await?;
                let request = resource.create_request(working, None, None);
                self.create(&request, diff).await
            }
            Diff::Delete => {
                self.delete_one(&resource.name, resource.kind(), &actual.identity, diff)
                    .await?;
                Ok(actual)
            }
        }
    }

    /// Scale a pool to its desired count.
    ///
    /// The lowest free indices are created and the highest indices beyond the
    /// count are deleted, so instance names stay stable across runs.
    async fn apply_pool(
        &self,
        working: &Cluster,
        resource: &Resource,
        actual: Option<ResourceState>,
        diff: &Diff,
    ) -> Result<ResourceState> {
        let pool = resource.as_server_pool().ok_or_else(|| {
            ClusterError::InvalidConfig(format!("'{}' is not a server pool", resource.name))
        })?;

        let mut current: Vec<Instance> = actual.map(|a| a.instances).unwrap_or_default();
        current.sort_by_key(|i| i.index);

        if let Diff::Replace(_) = diff {
            self.delete_instances(&resource.name, &current, diff).await?;
            current.clear();
        }

        let desired = pool.count as usize;
        if current.len() > desired {
            let extras = current.split_off(desired);
            info!(resource = %resource.name, count = extras.len(), "Removing surplus instances");
            self.delete_instances(&resource.name, &extras, diff).await?;
        }

        let missing: Vec<u32> = (0u32..)
            .filter(|i| !current.iter().any(|c| c.index == *i))
            .take(desired - current.len())
            .collect();

        if !missing.is_empty() {
            let vars = BootstrapVars::for_pool(working, pool.role);
            let payload = self
                .injector
                .render(&pool.bootstrap, &vars)
                .map_err(|source| ReconcileError::Payload {
                    resource: resource.name.clone(),
                    source,
                })?;
            let user_data = String::from_utf8_lossy(&payload).into_owned();
            info!(resource = %resource.name, count = missing.len(), "Launching instances");

            let results: Vec<Result<Instance>> = stream::iter(missing)
                .map(|index| {
                    let request = resource.create_request(working, Some(index), Some(user_data.clone()));
                    async move { self.launch(request, index, diff).await }
                })
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;

            for result in results {
                current.push(result?);
            }
        }

        current.sort_by_key(|i| i.index);
        let mut state = resource.expected(working);
        state.identity = naming::resource_name(&working.name, &resource.name);
        state
            .properties
            .insert("count".into(), (current.len() as u64).into());
        state.instances = current;
        Ok(state)
    }

    async fn launch(&self, request: CreateRequest, index: u32, diff: &Diff) -> Result<Instance> {
        self.check_cancelled()?;
        let state = self.create(&request, diff).await?;
        Ok(Instance {
            id: state.identity.clone(),
            name: state.provider_name.clone(),
            index,
            public_ip: state.attribute_str("public_ip").map(str::to_string),
            private_ip: state.attribute_str("private_ip").map(str::to_string),
        })
    }

    /// Create one object. After a failed attempt the provider is searched for
    /// the deterministic name first, since the failure may have hidden a
    /// create that actually landed.
    async fn create(&self, request: &CreateRequest, diff: &Diff) -> Result<ResourceState> {
        let label = format!("create {}", request.provider_name);
        let attempted = AtomicBool::new(false);
        let attempted = &attempted;
        let state = with_retry(&self.options.retry, &self.cancel, &label, move || async move {
            if attempted.swap(true, Ordering::SeqCst)
                && let Some(existing) = self.find_created(request).await?
            {
                info!(resource = %request.name, identity = %existing.identity, "Adopting object from an earlier attempt");
                return self.provider.adopt(request, existing).await;
            }
            self.provider.create(request).await
        })
        .await
        .map_err(|f| apply_error(&request.name, diff, f))?;
        debug!(resource = %request.name, identity = %state.identity, "Created");
        Ok(state.with_name(&request.name))
    }

    async fn find_created(
        &self,
        request: &CreateRequest,
    ) -> clusterflow_cloud::Result<Option<ResourceState>> {
        let filter = Filter::resource(&request.cluster, &request.name);
        Ok(self
            .provider
            .describe(request.kind, &filter)
            .await?
            .into_iter()
            .find(|s| s.provider_name == request.provider_name))
    }

    async fn delete_one(
        &self,
        name: &str,
        kind: ResourceKind,
        identity: &str,
        diff: &Diff,
    ) -> Result<()> {
        let label = format!("delete {name}");
        with_retry(&self.options.retry, &self.cancel, &label, || {
            self.provider.delete(kind, identity)
        })
        .await
        .map_err(|f| apply_error(name, diff, f))?;
        debug!(resource = name, identity, "Deleted");
        Ok(())
    }

    async fn delete_instances(&self, name: &str, instances: &[Instance], diff: &Diff) -> Result<()> {
        let results: Vec<Result<()>> = stream::iter(instances)
            .map(|instance| async move {
                self.check_cancelled()?;
                self.delete_one(name, ResourceKind::ServerPool, &instance.id, diff)
                    .await
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Delete whatever backs `resource`. Returns false if nothing existed.
    async fn delete_resource(&self, cluster: &Cluster, resource: &Resource) -> Result<bool> {
        let actual = resource
            .actual(self.provider.as_ref(), cluster)
            .await
            .map_err(|source| ReconcileError::Query {
                resource: resource.name.clone(),
                source,
            })?;
        let Some(actual) = actual else {
            debug!(resource = %resource.name, "Already gone");
            return Ok(false);
        };

        info!(resource = %resource.name, kind = %resource.kind(), "Deleting");
        if resource.kind() == ResourceKind::ServerPool {
            self.delete_instances(&resource.name, &actual.instances, &Diff::Delete)
                .await?;
        } else {
            self.delete_one(&resource.name, resource.kind(), &actual.identity, &Diff::Delete)
                .await?;
        }
        Ok(true)
    }

    /// Tear down every resource of `cluster`, dependents first
    #[instrument(skip_all, fields(cluster = %cluster.name, provider = %self.provider.name()))]
    pub async fn destroy(&self, cluster: &Cluster) -> Result<Plan> {
        self.check_supported(cluster)?;
        let order = DependencyGraph::build(&cluster.resources)?.deletion_order()?;

        let mut plan = Plan::empty();
        for name in &order {
            self.check_cancelled()?;
            let Some(resource) = cluster.resource(name) else {
                continue;
            };
            let diff = if self.delete_resource(cluster, resource).await? {
                Diff::Delete
            } else {
                Diff::NoChange
            };
            plan.push(name, resource.kind(), diff);
        }

        info!(summary = %plan.summary(), "Cluster destroyed");
        Ok(plan)
    }

    /// Compute every diff without applying any of them
    #[instrument(skip_all, fields(cluster = %desired.name, provider = %self.provider.name()))]
    pub async fn plan(&self, desired: &Cluster, baseline: Option<&Cluster>) -> Result<Plan> {
        let order = self.preflight(desired)?;
        let working = self.prepare(desired, baseline);

        let mut plan = Plan::empty();
        for name in &order {
            let Some(resource) = working.resource(name) else {
                continue;
            };
            let actual = resource
                .actual(self.provider.as_ref(), &working)
                .await
                .map_err(|source| ReconcileError::Query {
                    resource: name.clone(),
                    source,
                })?;
            let diff = compute_diff(actual.as_ref(), &resource.expected(&working));
            plan.push(name, resource.kind(), diff);
        }

        if let Some(baseline) = baseline {
            for resource in removed_resources(baseline, &working)? {
                let actual = resource
                    .actual(self.provider.as_ref(), baseline)
                    .await
                    .map_err(|source| ReconcileError::Query {
                        resource: resource.name.clone(),
                        source,
                    })?;
                if actual.is_some() {
                    plan.push(&resource.name, resource.kind(), Diff::Delete);
                }
            }
        }

        Ok(plan)
    }
}

/// Refuse to replace an object that changed outside this tool.
fn check_drift(
    resource: &Resource,
    actual: &ResourceState,
    expected: &ResourceState,
    baseline: Option<&Cluster>,
) -> Result<()> {
    let Some(baseline) = baseline else {
        return Ok(());
    };
    let Some(previous) = baseline
        .resource(&resource.name)
        .filter(|r| r.kind() == resource.kind())
    else {
        return Ok(());
    };

    let fields = drifted_fields(&previous.expected(baseline), actual, expected);
    if fields.is_empty() {
        return Ok(());
    }
    warn!(resource = %resource.name, fields = ?fields, "Drift detected");
    Err(ReconcileError::Drift {
        resource: resource.name.clone(),
        fields,
    })
}

/// Baseline resources no longer declared, in the order they must be deleted
fn removed_resources<'a>(baseline: &'a Cluster, working: &Cluster) -> Result<Vec<&'a Resource>> {
    let order = DependencyGraph::build(&baseline.resources)?.deletion_order()?;
    Ok(order
        .iter()
        .filter(|name| working.resource(name).is_none())
        .filter_map(|name| baseline.resource(name))
        .collect())
}

fn apply_error(resource: &str, diff: &Diff, failure: RetryFailure) -> ReconcileError {
    match failure {
        RetryFailure::Cancelled(_) => ReconcileError::Cancelled,
        RetryFailure::Failed(source) => ReconcileError::Apply {
            resource: resource.to_string(),
            diff: diff.clone(),
            retry_safe: diff.is_retry_safe(),
            source,
        },
    }
}
