//! Actual / Expected / Render for declared resources

use crate::error::{CloudError, Result};
use crate::provider::CloudProvider;
use crate::resource::{CreateRequest, Filter, ResourceState};
use async_trait::async_trait;
use clusterflow_core::naming;
use clusterflow_core::{Cluster, Instance, NodeRole, Properties, Resource, ResourceKind, ResourceSpec};
use serde_json::Value;
use tracing::{debug, warn};

/// How a declared resource is observed, projected and merged back.
#[async_trait]
pub trait ResourceModel {
    /// Query the provider for the object(s) backing this resource.
    ///
    /// `None` means nothing exists yet. For server pools the per-instance
    /// states are folded into one pool state carrying `count`.
    async fn actual(
        &self,
        provider: &dyn CloudProvider,
        cluster: &Cluster,
    ) -> Result<Option<ResourceState>>;

    /// What the provider should report once this resource converged.
    /// Pure: no I/O.
    fn expected(&self, cluster: &Cluster) -> ResourceState;

    /// Arguments for creating this resource (one instance for pools)
    fn create_request(
        &self,
        cluster: &Cluster,
        index: Option<u32>,
        user_data: Option<String>,
    ) -> CreateRequest;

    /// Merge a converged state into the working cluster
    fn render(&self, cluster: &mut Cluster, actual: &ResourceState);
}

#[async_trait]
impl ResourceModel for Resource {
    async fn actual(
        &self,
        provider: &dyn CloudProvider,
        cluster: &Cluster,
    ) -> Result<Option<ResourceState>> {
        let kind = self.kind();
        let filter = Filter::resource(&cluster.name, &self.name);
        let mut found: Vec<ResourceState> = provider
            .describe(kind, &filter)
            .await?
            .into_iter()
            .filter(|s| filter.matches(kind, s))
            .collect();
        debug!(resource = %self.name, kind = %kind, matches = found.len(), "Described resource");

        if kind == ResourceKind::ServerPool {
            return aggregate_pool(cluster, self, found);
        }

        if found.len() > 1 {
            // prefer the object the snapshot already knows
            if let Some(identity) = &self.identity
                && let Some(pos) = found.iter().position(|s| s.identity == *identity)
                && found.iter().filter(|s| s.identity == *identity).count() == 1
            {
                let known = found.swap_remove(pos);
                found = vec![known];
            } else {
                let ids: Vec<&str> = found.iter().map(|s| s.identity.as_str()).collect();
                return Err(CloudError::Conflict(format!(
                    "{} objects match {} '{}': {}",
                    found.len(),
                    kind,
                    self.name,
                    ids.join(", ")
                )));
            }
        }

        Ok(found.pop().map(|state| state.with_name(&self.name)))
    }

    fn expected(&self, cluster: &Cluster) -> ResourceState {
        let mut state = ResourceState::new(
            self.kind(),
            self.identity.clone().unwrap_or_default(),
            naming::resource_name(&cluster.name, &self.name),
        )
        .with_name(&self.name)
        .with_tags(naming::tags_for(&cluster.name, &self.name));
        state.properties = self.spec.properties();

        match &self.spec {
            ResourceSpec::Subnet(subnet) => {
                if let Some(id) = cluster.identity_of(&subnet.network) {
                    state.properties.insert("network_id".into(), id.into());
                }
            }
            ResourceSpec::LoadBalancer(lb) => {
                state.properties.insert("pool".into(), lb.pool.clone().into());
            }
            _ => {}
        }
        state
    }

    fn create_request(
        &self,
        cluster: &Cluster,
        index: Option<u32>,
        user_data: Option<String>,
    ) -> CreateRequest {
        let expected = self.expected(cluster);
        let mut references = Properties::new();

        match &self.spec {
            ResourceSpec::Subnet(subnet) => {
                insert_identity(&mut references, cluster, "network_id", &subnet.network);
            }
            ResourceSpec::ServerPool(pool) => {
                if let Some(key) = &pool.key_pair {
                    insert_identity(&mut references, cluster, "key_pair_id", key);
                }
                if let Some(network) = &pool.network {
                    insert_identity(&mut references, cluster, "network_id", network);
                }
                if let Some(subnet) = &pool.subnet {
                    insert_identity(&mut references, cluster, "subnet_id", subnet);
                }
                let firewalls: Vec<Value> = pool
                    .firewalls
                    .iter()
                    .filter_map(|fw| cluster.identity_of(fw))
                    .map(Value::from)
                    .collect();
                references.insert("firewall_ids".into(), Value::Array(firewalls));
                let firewall_names: Vec<Value> = pool
                    .firewalls
                    .iter()
                    .map(|fw| Value::from(naming::resource_name(&cluster.name, fw)))
                    .collect();
                references.insert("firewall_names".into(), Value::Array(firewall_names));
                references.insert("role".into(), pool.role.as_str().into());
                references.insert(
                    "pool_tag".into(),
                    naming::resource_name(&cluster.name, &self.name).into(),
                );
            }
            ResourceSpec::LoadBalancer(lb) => {
                references.insert(
                    "pool_tag".into(),
                    naming::resource_name(&cluster.name, &lb.pool).into(),
                );
                let ids: Vec<Value> = cluster
                    .resource(&lb.pool)
                    .and_then(Resource::as_server_pool)
                    .map(|p| p.instances.iter().map(|i| Value::from(i.id.as_str())).collect())
                    .unwrap_or_default();
                references.insert("pool_instance_ids".into(), Value::Array(ids));
            }
            _ => {}
        }

        let provider_name = match index {
            Some(i) => naming::instance_name(&cluster.name, &self.name, i),
            None => expected.provider_name.clone(),
        };

        CreateRequest {
            kind: self.kind(),
            cluster: cluster.name.clone(),
            name: self.name.clone(),
            provider_name,
            tags: expected.tags,
            properties: expected.properties,
            references,
            index,
            user_data,
        }
    }

    fn render(&self, cluster: &mut Cluster, actual: &ResourceState) {
        let Some(resource) = cluster.resource_mut(&self.name) else {
            return;
        };
        resource.identity = Some(actual.identity.clone());

        let mut endpoint = None;
        if let Some(pool) = resource.as_server_pool_mut() {
            pool.instances = actual.instances.clone();
            if pool.role == NodeRole::Master {
                endpoint = pool
                    .instances
                    .first()
                    .and_then(|i| i.private_ip.clone().or_else(|| i.public_ip.clone()));
            }
        }
        if endpoint.is_some() {
            cluster.api_endpoint = endpoint;
        }
    }
}

fn insert_identity(references: &mut Properties, cluster: &Cluster, key: &str, name: &str) {
    if let Some(id) = cluster.identity_of(name) {
        references.insert(key.to_string(), id.into());
    }
}

/// Fold per-instance states into one pool state.
fn aggregate_pool(
    cluster: &Cluster,
    resource: &Resource,
    found: Vec<ResourceState>,
) -> Result<Option<ResourceState>> {
    let mut members: Vec<(Instance, ResourceState)> = Vec::with_capacity(found.len());
    for state in found {
        let Some(index) =
            naming::parse_instance_index(&cluster.name, &resource.name, &state.provider_name)
        else {
            warn!(
                resource = %resource.name,
                instance = %state.provider_name,
                "Ignoring tagged instance with an unrecognised name"
            );
            continue;
        };
        if members.iter().any(|(i, _)| i.index == index) {
            return Err(CloudError::Conflict(format!(
                "more than one instance named {}",
                state.provider_name
            )));
        }
        let instance = Instance {
            id: state.identity.clone(),
            name: state.provider_name.clone(),
            index,
            public_ip: state.attribute_str("public_ip").map(str::to_string),
            private_ip: state.attribute_str("private_ip").map(str::to_string),
        };
        members.push((instance, state));
    }

    if members.is_empty() {
        return Ok(None);
    }
    members.sort_by_key(|(i, _)| i.index);

    let pool_name = naming::resource_name(&cluster.name, &resource.name);
    let mut pool = ResourceState::new(ResourceKind::ServerPool, pool_name.clone(), pool_name)
        .with_name(&resource.name)
        .with_tags(naming::tags_for(&cluster.name, &resource.name))
        .with_property("count", members.len() as u64);

    let (_, first) = &members[0];
    for field in ["size", "image"] {
        if let Some(value) = first.property(field) {
            pool.properties.insert(field.to_string(), value.clone());
        }
    }
    pool.instances = members.into_iter().map(|(i, _)| i).collect();
    Ok(Some(pool))
}
