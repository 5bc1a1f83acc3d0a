use async_trait::async_trait;
use clusterflow_bootstrap::{BootstrapInjector, DirectoryAssets, EmbeddedAssets};
use clusterflow_cloud::{
    AuthStatus, CloudError, CloudProvider, CreateRequest, FieldSet, FileStateStore, Filter,
    ResourceState, RetryConfig,
};
use clusterflow_core::{Cluster, ResourceKind, naming, parse_cluster_string};
use clusterflow_reconciler::{ClusterSession, ReconcileOptions, Reconciler};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A cluster with a network, a subnet, a master pool and a worker pool
#[allow(dead_code)]
pub const CLUSTER_KDL: &str = r#"
cluster "demo" {
    cloud "digitalocean"
    location "nyc3"
    kubernetes-version "1.29.0"

    key-pair "admin" {
        public-key "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest admin@example"
    }

    network "n1" {
        cidr "10.10.0.0/16"
    }

    subnet "s1" {
        network "n1"
        cidr "10.10.1.0/24"
    }

    server-pool "master" {
        role "master"
        count 1
        size "s-2vcpu-4gb"
        image "ubuntu-22-04-x64"
        bootstrap "digitalocean_k8s_ubuntu_master"
        key-pair "admin"
        network "n1"
        subnet "s1"
    }

    server-pool "workers" {
        role "node"
        count WORKERS
        size "s-2vcpu-4gb"
        image "ubuntu-22-04-x64"
        bootstrap "digitalocean_k8s_ubuntu_node"
        key-pair "admin"
        network "n1"
        subnet "s1"
    }
}
"#;

#[allow(dead_code)]
pub fn cluster(workers: u32) -> Cluster {
    parse_cluster_string(&CLUSTER_KDL.replace("WORKERS", &workers.to_string())).unwrap()
}

/// A provider call that fails `times` times before behaving normally
struct Fault {
    op: &'static str,
    kind: Option<ResourceKind>,
    times: u32,
    error: fn() -> CloudError,
    /// The call takes effect even though an error is returned
    lands: bool,
}

#[derive(Default)]
struct FakeState {
    objects: Vec<ResourceState>,
    calls: Vec<String>,
    faults: Vec<Fault>,
    next_id: u32,
}

/// In-memory provider recording every call
pub struct FakeProvider {
    state: Mutex<FakeState>,
    kinds: Vec<ResourceKind>,
    /// Reason every definition is refused, if set
    restriction: Option<String>,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new() -> Self {
        Self::with_kinds(ResourceKind::ALL.to_vec())
    }

    pub fn with_kinds(kinds: Vec<ResourceKind>) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            kinds,
            restriction: None,
        }
    }

    /// Refuse every definition in `check_cluster`
    pub fn restricted(reason: &str) -> Self {
        Self {
            restriction: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// Fail the next `times` calls of `op` ("describe", "create", "update",
    /// "delete") on `kind`
    pub fn fail(&self, op: &'static str, kind: ResourceKind, times: u32, error: fn() -> CloudError) {
        self.push_fault(op, Some(kind), times, error, false);
    }

    /// Let the next create of `kind` succeed remotely but report `error`
    pub fn lose_create_response(&self, kind: ResourceKind, error: fn() -> CloudError) {
        self.push_fault("create", Some(kind), 1, error, true);
    }

    fn push_fault(
        &self,
        op: &'static str,
        kind: Option<ResourceKind>,
        times: u32,
        error: fn() -> CloudError,
        lands: bool,
    ) {
        self.state.lock().unwrap().faults.push(Fault {
            op,
            kind,
            times,
            error,
            lands,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("describe"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn objects(&self, kind: ResourceKind) -> Vec<ResourceState> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect()
    }

    pub fn object(&self, provider_name: &str) -> Option<ResourceState> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|o| o.provider_name == provider_name)
            .cloned()
    }

    /// Change a property behind the reconciler's back
    pub fn tamper(&self, provider_name: &str, field: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(object) = state
            .objects
            .iter_mut()
            .find(|o| o.provider_name == provider_name)
        {
            object.properties.insert(field.to_string(), value.into());
        }
    }

    /// Delete an object behind the reconciler's back
    pub fn remove(&self, provider_name: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .retain(|o| o.provider_name != provider_name);
    }

    /// Index of the first call equal to `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl FakeState {
    /// Consume a matching fault. Returns the error and whether the call lands.
    fn trip(&mut self, op: &str, kind: ResourceKind) -> Option<(CloudError, bool)> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.kind.is_none_or(|k| k == kind) && f.times > 0)?;
        fault.times -= 1;
        Some(((fault.error)(), fault.lands))
    }

    fn kind_of(&self, identity: &str) -> Option<ResourceKind> {
        self.objects
            .iter()
            .find(|o| o.identity == identity)
            .map(|o| o.kind)
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn display_name(&self) -> &str {
        "Fake Cloud"
    }

    async fn check_auth(&self) -> clusterflow_cloud::Result<AuthStatus> {
        Ok(AuthStatus::ok("fake account"))
    }

    fn supported_kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    fn check_cluster(&self, _cluster: &Cluster) -> clusterflow_cloud::Result<()> {
        match &self.restriction {
            Some(reason) => Err(CloudError::Unsupported(reason.clone())),
            None => Ok(()),
        }
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> clusterflow_cloud::Result<Vec<ResourceState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("describe {kind}"));
        if let Some((error, _)) = state.trip("describe", kind) {
            return Err(error);
        }
        let tag = naming::cluster_tag(&filter.cluster);
        Ok(state
            .objects
            .iter()
            .filter(|o| o.kind == kind && o.tags.contains(&tag))
            .cloned()
            .collect())
    }

    async fn create(&self, request: &CreateRequest) -> clusterflow_cloud::Result<ResourceState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {}", request.provider_name));
        let lost_response = match state.trip("create", request.kind) {
            Some((error, false)) => return Err(error),
            Some((error, true)) => Some(error),
            None => None,
        };

        state.next_id += 1;
        let id = state.next_id;
        let mut object = ResourceState::new(
            request.kind,
            format!("fake-{id}"),
            request.provider_name.clone(),
        )
        .with_name(&request.name)
        .with_tags(request.tags.clone());
        object.properties = request.properties.clone();
        if let Some(user_data) = &request.user_data {
            object
                .attributes
                .insert("user_data".into(), user_data.clone().into());
        }

        match request.kind {
            ResourceKind::Subnet => {
                if let Some(network) = request.reference_str("network_id") {
                    object.properties.insert("network_id".into(), network.into());
                }
            }
            ResourceKind::ServerPool => {
                object.properties.remove("count");
                object
                    .attributes
                    .insert("private_ip".into(), format!("10.10.1.{id}").into());
                object
                    .attributes
                    .insert("public_ip".into(), format!("203.0.113.{id}").into());
            }
            _ => {}
        }

        state.objects.push(object.clone());
        match lost_response {
            Some(error) => Err(error),
            None => Ok(object),
        }
    }

    async fn adopt(
        &self,
        request: &CreateRequest,
        existing: ResourceState,
    ) -> clusterflow_cloud::Result<ResourceState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("adopt {}", request.provider_name));
        Ok(existing)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        identity: &str,
        changes: &FieldSet,
    ) -> clusterflow_cloud::Result<ResourceState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update {identity}"));
        if let Some((error, _)) = state.trip("update", kind) {
            return Err(error);
        }
        let object = state
            .objects
            .iter_mut()
            .find(|o| o.identity == identity)
            .ok_or_else(|| CloudError::NotFound(identity.to_string()))?;
        for change in changes {
            object
                .properties
                .insert(change.field.clone(), change.to.clone());
        }
        Ok(object.clone())
    }

    async fn delete(&self, kind: ResourceKind, identity: &str) -> clusterflow_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        let label = state
            .objects
            .iter()
            .find(|o| o.identity == identity)
            .map(|o| o.provider_name.clone())
            .unwrap_or_else(|| identity.to_string());
        state.calls.push(format!("delete {label}"));
        let kind = state.kind_of(identity).unwrap_or(kind);
        if let Some((error, _)) = state.trip("delete", kind) {
            return Err(error);
        }
        state.objects.retain(|o| o.identity != identity);
        Ok(())
    }
}

/// A session over a fake provider and a temporary state directory
#[allow(dead_code)]
pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub store: Arc<FileStateStore>,
    pub session: ClusterSession,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_provider(FakeProvider::new())
    }

    pub fn with_provider(provider: FakeProvider) -> Self {
        Self::build(provider, RetryConfig::immediate(4))
    }

    pub fn build(provider: FakeProvider, retry: RetryConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::assemble(dir, provider, retry, BootstrapInjector::new(EmbeddedAssets))
    }

    /// Templates in `templates` shadow the built-in ones
    pub fn with_templates(templates: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let template_dir = dir.path().join("templates");
        std::fs::create_dir(&template_dir).unwrap();
        for (name, body) in templates {
            std::fs::write(template_dir.join(format!("{name}.sh")), body).unwrap();
        }
        let assets = DirectoryAssets::new(&template_dir).with_fallback(EmbeddedAssets);
        Self::assemble(
            dir,
            FakeProvider::new(),
            RetryConfig::immediate(4),
            BootstrapInjector::new(assets),
        )
    }

    fn assemble(
        dir: TempDir,
        provider: FakeProvider,
        retry: RetryConfig,
        injector: BootstrapInjector,
    ) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(FileStateStore::new(dir.path()));
        let reconciler = Reconciler::new(
            provider.clone(),
            injector,
            ReconcileOptions {
                retry,
                concurrency: 2,
            },
        );
        let session = ClusterSession::new(reconciler, store.clone());
        Self {
            provider,
            store,
            session,
            dir,
        }
    }

    pub fn snapshot_bytes(&self, cluster: &str) -> Option<Vec<u8>> {
        std::fs::read(self.store.snapshot_path(cluster)).ok()
    }
}
