//! Cluster aggregate

use super::resource::{NodeRole, Resource, ResourceKind, ServerPoolSpec};
use serde::{Deserialize, Serialize};

/// Cloud the cluster is provisioned on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudKind {
    Sakura,
    DigitalOcean,
}

impl CloudKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudKind::Sakura => "sakura-cloud",
            CloudKind::DigitalOcean => "digitalocean",
        }
    }
}

impl std::fmt::Display for CloudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CloudKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sakura" | "sakura-cloud" => Ok(CloudKind::Sakura),
            "digitalocean" | "do" => Ok(CloudKind::DigitalOcean),
            other => Err(format!("unknown cloud: {other}")),
        }
    }
}

/// Root aggregate: the declared topology plus everything learned from the
/// provider during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,

    pub cloud: CloudKind,

    /// Zone or region
    pub location: String,

    pub kubernetes_version: String,

    /// kubeadm join token shared by every pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_token: Option<String>,

    /// Address node pools join, known once a master instance is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Resources in declaration order
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        cloud: CloudKind,
        location: impl Into<String>,
        kubernetes_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cloud,
            location: location.into(),
            kubernetes_version: kubernetes_version.into(),
            join_token: None,
            api_endpoint: None,
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.name == name)
    }

    /// Provider identity of a resource, if it has been created
    pub fn identity_of(&self, name: &str) -> Option<&str> {
        self.resource(name).and_then(|r| r.identity.as_deref())
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn server_pools(&self) -> impl Iterator<Item = (&str, &ServerPoolSpec)> {
        self.resources
            .iter()
            .filter_map(|r| r.as_server_pool().map(|p| (r.name.as_str(), p)))
    }

    pub fn master_pools(&self) -> impl Iterator<Item = (&str, &ServerPoolSpec)> {
        self.server_pools()
            .filter(|(_, pool)| pool.role == NodeRole::Master)
    }

    /// The cluster's network (VPC), if one is declared
    pub fn network(&self) -> Option<&Resource> {
        self.resources_of(ResourceKind::Network).next()
    }

    /// The SSH key pair, if one is declared
    pub fn key_pair(&self) -> Option<&Resource> {
        self.resources_of(ResourceKind::KeyPair).next()
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn total_instances(&self) -> usize {
        self.server_pools().map(|(_, p)| p.instances.len()).sum()
    }

    /// Add the resources of `other` whose names `self` does not declare.
    ///
    /// Used on teardown: a snapshot only lists what converged, while the
    /// definition may name resources a failed run created afterwards.
    pub fn absorb_missing(&mut self, other: &Cluster) {
        for resource in &other.resources {
            if self.resource(&resource.name).is_none() {
                self.resources.push(resource.clone());
            }
        }
    }

    /// Carry provider-learned state over from a previous snapshot.
    ///
    /// Identities, observed instances, the join token and the API endpoint
    /// are copied for every resource still present in `self`; declared
    /// properties are left untouched.
    pub fn inherit_from(&mut self, baseline: &Cluster) {
        if self.join_token.is_none() {
            self.join_token = baseline.join_token.clone();
        }
        if self.api_endpoint.is_none() {
            self.api_endpoint = baseline.api_endpoint.clone();
        }
        for resource in &mut self.resources {
            let Some(previous) = baseline.resource(&resource.name) else {
                continue;
            };
            if previous.kind() != resource.kind() {
                continue;
            }
            if resource.identity.is_none() {
                resource.identity = previous.identity.clone();
            }
            if let (Some(pool), Some(prev_pool)) =
                (resource.as_server_pool_mut(), previous.as_server_pool())
                && pool.instances.is_empty()
            {
                pool.instances = prev_pool.instances.clone();
            }
        }
    }
}
