//! Resource node parsing

use super::{first_integer, first_string, prop_integer, prop_string, string_args};
use crate::error::{ClusterError, Result};
use crate::model::{
    FirewallRule, FirewallSpec, ForwardingRule, KeyPairSpec, LoadBalancerSpec, NetworkSpec,
    NodeRole, Resource, ResourceSpec, ServerPoolSpec, SubnetSpec,
};
use kdl::KdlNode;

/// Parse one resource node (`network`, `subnet`, `server-pool`, ...)
pub fn parse_resource(node: &KdlNode) -> Result<Resource> {
    let kind = node.name().value();
    let name = first_string(node)
        .ok_or_else(|| ClusterError::InvalidConfig(format!("{kind} requires a name")))?
        .to_string();

    let mut fields = Fields::new(&name);
    let mut depends_on = Vec::new();
    let mut rules = Vec::new();
    let mut forwarding = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" | "depends_on" => depends_on.extend(string_args(child)),
                "rule" => rules.push(parse_firewall_rule(&name, child)?),
                "forward" => forwarding.push(parse_forwarding_rule(&name, child)?),
                _ => fields.push(child),
            }
        }
    }

    let spec = match kind {
        "key-pair" | "key_pair" | "ssh-key" => {
            let public_key_path = fields.take_string("public-key-path");
            let public_key = fields.take_string("public-key").unwrap_or_default();
            if public_key.is_empty() && public_key_path.is_none() {
                return Err(fields.invalid("requires `public-key` or `public-key-path`"));
            }
            ResourceSpec::KeyPair(KeyPairSpec {
                public_key,
                public_key_path,
            })
        }
        "network" | "vpc" => ResourceSpec::Network(NetworkSpec {
            cidr: fields.require_string("cidr")?,
        }),
        "subnet" => ResourceSpec::Subnet(SubnetSpec {
            network: fields.require_string("network")?,
            cidr: fields.require_string("cidr")?,
        }),
        "firewall" => ResourceSpec::Firewall(FirewallSpec { rules }),
        "server-pool" | "server_pool" => {
            let role = match fields.take_string("role") {
                Some(role) => role.parse().map_err(|e: String| fields.invalid(&e))?,
                None => NodeRole::Node,
            };
            let count = fields.take_integer("count").unwrap_or(1);
            let count = u32::try_from(count).map_err(|_| fields.invalid("count out of range"))?;
            let mut pool = ServerPoolSpec::new(
                role,
                count,
                fields.require_string("size")?,
                fields.require_string("image")?,
                fields.require_string("bootstrap")?,
            );
            pool.key_pair = fields.take_string("key-pair");
            pool.network = fields.take_string("network");
            pool.subnet = fields.take_string("subnet");
            pool.firewalls = fields.take_strings("firewalls");
            ResourceSpec::ServerPool(pool)
        }
        "load-balancer" | "load_balancer" => ResourceSpec::LoadBalancer(LoadBalancerSpec {
            pool: fields.require_string("pool")?,
            forwarding,
        }),
        other => {
            return Err(ClusterError::InvalidConfig(format!(
                "unknown resource type `{other}` ({name})"
            )));
        }
    };

    fields.finish()?;

    let mut resource = Resource::new(name, spec);
    resource.depends_on = depends_on;
    Ok(resource)
}

fn parse_firewall_rule(owner: &str, node: &KdlNode) -> Result<FirewallRule> {
    let port = prop_integer(node, "port")
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ClusterError::InvalidResource {
            resource: owner.to_string(),
            message: "rule requires a valid `port`".to_string(),
        })?;
    Ok(FirewallRule {
        protocol: prop_string(node, "protocol").unwrap_or("tcp").to_string(),
        port,
        source: prop_string(node, "source").unwrap_or("0.0.0.0/0").to_string(),
    })
}

fn parse_forwarding_rule(owner: &str, node: &KdlNode) -> Result<ForwardingRule> {
    let port = |key: &str| {
        prop_integer(node, key)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| ClusterError::InvalidResource {
                resource: owner.to_string(),
                message: format!("forward requires a valid `{key}`"),
            })
    };
    let entry_port = port("entry")?;
    let target_port = prop_integer(node, "target")
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(entry_port);
    Ok(ForwardingRule {
        protocol: prop_string(node, "protocol").unwrap_or("tcp").to_string(),
        entry_port,
        target_port,
    })
}

/// Child nodes of a resource, consumed field by field so that anything left
/// over can be reported as unknown.
struct Fields<'a> {
    owner: &'a str,
    nodes: Vec<&'a KdlNode>,
}

impl<'a> Fields<'a> {
    fn new(owner: &'a str) -> Self {
        Self {
            owner,
            nodes: Vec::new(),
        }
    }

    fn push(&mut self, node: &'a KdlNode) {
        self.nodes.push(node);
    }

    fn take(&mut self, key: &str) -> Option<&'a KdlNode> {
        let alt = key.replace('-', "_");
        let pos = self
            .nodes
            .iter()
            .position(|n| n.name().value() == key || n.name().value() == alt)?;
        Some(self.nodes.remove(pos))
    }

    fn take_string(&mut self, key: &str) -> Option<String> {
        self.take(key)
            .and_then(first_string)
            .map(|s| s.to_string())
    }

    fn take_strings(&mut self, key: &str) -> Vec<String> {
        self.take(key).map(string_args).unwrap_or_default()
    }

    fn take_integer(&mut self, key: &str) -> Option<i128> {
        self.take(key).and_then(first_integer)
    }

    fn require_string(&mut self, key: &str) -> Result<String> {
        self.take_string(key)
            .ok_or_else(|| self.invalid(&format!("`{key}` is required")))
    }

    fn invalid(&self, message: &str) -> ClusterError {
        ClusterError::InvalidResource {
            resource: self.owner.to_string(),
            message: message.to_string(),
        }
    }

    fn finish(self) -> Result<()> {
        match self.nodes.first() {
            Some(node) => Err(self.invalid(&format!("unknown field `{}`", node.name().value()))),
            None => Ok(()),
        }
    }
}
