//! Infrastructure resources
//!
//! A resource is one element of the cluster topology. Its logical name is the
//! join key between the declared definition, the persisted snapshot and the
//! provider's observed state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparable properties of a resource, keyed by field name
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Resource variants, in the order they usually appear in a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    KeyPair,
    Network,
    Subnet,
    Firewall,
    ServerPool,
    LoadBalancer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::KeyPair,
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::Firewall,
        ResourceKind::ServerPool,
        ResourceKind::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Firewall => "firewall",
            ResourceKind::ServerPool => "server-pool",
            ResourceKind::LoadBalancer => "load-balancer",
        }
    }

    /// Fields that cannot be changed in place; a change forces a replace
    pub fn immutable_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::KeyPair => &["public_key"],
            ResourceKind::Network => &["cidr"],
            ResourceKind::Subnet => &["cidr", "network_id"],
            ResourceKind::Firewall => &[],
            ResourceKind::ServerPool => &["size", "image"],
            ResourceKind::LoadBalancer => &["pool"],
        }
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable_fields().contains(&field)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declared resource together with its provider identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Logical name, unique within the cluster and stable across runs
    pub name: String,

    /// Provider-assigned identity, empty until the first successful create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Explicitly declared producer dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    pub spec: ResourceSpec,
}

impl Resource {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            identity: None,
            depends_on: Vec::new(),
            spec,
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Names this resource points at through its properties
    pub fn references(&self) -> Vec<&str> {
        match &self.spec {
            ResourceSpec::KeyPair(_) | ResourceSpec::Network(_) | ResourceSpec::Firewall(_) => {
                Vec::new()
            }
            ResourceSpec::Subnet(subnet) => vec![subnet.network.as_str()],
            ResourceSpec::ServerPool(pool) => pool
                .key_pair
                .iter()
                .chain(pool.network.iter())
                .chain(pool.subnet.iter())
                .chain(pool.firewalls.iter())
                .map(String::as_str)
                .collect(),
            ResourceSpec::LoadBalancer(lb) => vec![lb.pool.as_str()],
        }
    }

    /// Explicit dependencies followed by references, without duplicates
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let all = self
            .depends_on
            .iter()
            .map(String::as_str)
            .chain(self.references());
        for dep in all {
            if !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }
        deps
    }

    pub fn as_server_pool(&self) -> Option<&ServerPoolSpec> {
        match &self.spec {
            ResourceSpec::ServerPool(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_server_pool_mut(&mut self) -> Option<&mut ServerPoolSpec> {
        match &mut self.spec {
            ResourceSpec::ServerPool(pool) => Some(pool),
            _ => None,
        }
    }
}

/// Variant-specific properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    KeyPair(KeyPairSpec),
    Network(NetworkSpec),
    Subnet(SubnetSpec),
    Firewall(FirewallSpec),
    ServerPool(ServerPoolSpec),
    LoadBalancer(LoadBalancerSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::KeyPair(_) => ResourceKind::KeyPair,
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::Subnet(_) => ResourceKind::Subnet,
            ResourceSpec::Firewall(_) => ResourceKind::Firewall,
            ResourceSpec::ServerPool(_) => ResourceKind::ServerPool,
            ResourceSpec::LoadBalancer(_) => ResourceKind::LoadBalancer,
        }
    }

    /// Declared fields that take part in the actual/expected comparison.
    ///
    /// References to other resources are not included here since their
    /// provider identities depend on the cluster being reconciled.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        match self {
            ResourceSpec::KeyPair(key) => {
                props.insert("public_key".into(), key.public_key.trim().into());
            }
            ResourceSpec::Network(network) => {
                props.insert("cidr".into(), network.cidr.clone().into());
            }
            ResourceSpec::Subnet(subnet) => {
                props.insert("cidr".into(), subnet.cidr.clone().into());
            }
            ResourceSpec::Firewall(firewall) => {
                props.insert("rules".into(), firewall_rules_value(&firewall.rules));
            }
            ResourceSpec::ServerPool(pool) => {
                props.insert("count".into(), pool.count.into());
                props.insert("size".into(), pool.size.clone().into());
                props.insert("image".into(), pool.image.clone().into());
            }
            ResourceSpec::LoadBalancer(lb) => {
                props.insert("forwarding".into(), forwarding_rules_value(&lb.forwarding));
            }
        }
        props
    }
}

/// Canonical (sorted) JSON form of a firewall rule set
pub fn firewall_rules_value(rules: &[FirewallRule]) -> serde_json::Value {
    let mut sorted = rules.to_vec();
    sorted.sort();
    sorted.dedup();
    serde_json::to_value(sorted).unwrap_or_default()
}

/// Canonical (sorted) JSON form of load balancer forwarding rules
pub fn forwarding_rules_value(rules: &[ForwardingRule]) -> serde_json::Value {
    let mut sorted = rules.to_vec();
    sorted.sort();
    sorted.dedup();
    serde_json::to_value(sorted).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPairSpec {
    /// OpenSSH public key material
    pub public_key: String,

    /// Where the key was read from, kept for display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Logical name of the parent network
    pub network: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallSpec {
    pub rules: Vec<FirewallRule>,
}

/// Inbound rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirewallRule {
    pub protocol: String,
    pub port: u16,
    pub source: String,
}

impl FirewallRule {
    pub fn tcp(port: u16, source: impl Into<String>) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port,
            source: source.into(),
        }
    }
}

/// Role a pool's instances play in the Kubernetes cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    #[default]
    Node,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Node => "node",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "master" | "control-plane" => Ok(NodeRole::Master),
            "node" | "worker" => Ok(NodeRole::Node),
            other => Err(format!("unknown node role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPoolSpec {
    pub role: NodeRole,

    /// Desired number of instances
    pub count: u32,

    /// Machine type / plan
    pub size: String,

    pub image: String,

    /// Bootstrap template name
    pub bootstrap: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewalls: Vec<String>,

    /// Running instances as last observed; filled in by reconciliation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<Instance>,
}

impl ServerPoolSpec {
    pub fn new(
        role: NodeRole,
        count: u32,
        size: impl Into<String>,
        image: impl Into<String>,
        bootstrap: impl Into<String>,
    ) -> Self {
        Self {
            role,
            count,
            size: size.into(),
            image: image.into(),
            bootstrap: bootstrap.into(),
            key_pair: None,
            network: None,
            subnet: None,
            firewalls: Vec::new(),
            instances: Vec::new(),
        }
    }
}

/// One running member of a server pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    /// Logical name of the target server pool
    pub pool: String,
    pub forwarding: Vec<ForwardingRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub protocol: String,
    pub entry_port: u16,
    pub target_port: u16,
}
