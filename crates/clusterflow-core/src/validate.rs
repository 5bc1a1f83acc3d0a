//! Static validation of a cluster definition
//!
//! Everything here runs before any provider call; a failure is a
//! configuration error and the run never starts applying.

use crate::error::{ClusterError, Result};
use crate::graph::DependencyGraph;
use crate::model::{Cluster, Resource, ResourceKind, ResourceSpec};
use crate::naming;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

/// Validate a cluster and return its creation order
pub fn validate(cluster: &Cluster) -> Result<Vec<String>> {
    if cluster.name.trim().is_empty() {
        return Err(ClusterError::InvalidConfig(
            "cluster name must not be empty".to_string(),
        ));
    }
    if cluster.kubernetes_version.trim().is_empty() {
        return Err(ClusterError::InvalidConfig(
            "kubernetes-version must not be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut provider_names: HashMap<String, &str> = HashMap::new();
    for resource in &cluster.resources {
        if resource.name.trim().is_empty() {
            return Err(ClusterError::InvalidConfig(format!(
                "{} without a name",
                resource.kind()
            )));
        }
        if !seen.insert(resource.name.as_str()) {
            return Err(ClusterError::DuplicateResource(resource.name.clone()));
        }
        // Provider names and ownership tags use the sanitized form
        let sanitized = naming::sanitize(&resource.name);
        if let Some(other) = provider_names.insert(sanitized.clone(), &resource.name) {
            return Err(ClusterError::NameCollision {
                resource: resource.name.clone(),
                other: other.to_string(),
                provider_name: naming::resource_name(&cluster.name, &resource.name),
            });
        }
    }

    for resource in &cluster.resources {
        validate_resource(cluster, resource)?;
    }

    let has_nodes = cluster
        .server_pools()
        .any(|(_, pool)| pool.role == crate::model::NodeRole::Node);
    if has_nodes && cluster.master_pools().next().is_none() {
        return Err(ClusterError::MissingMasterPool);
    }

    DependencyGraph::build(&cluster.resources)?.creation_order()
}

fn validate_resource(cluster: &Cluster, resource: &Resource) -> Result<()> {
    let invalid = |message: String| ClusterError::InvalidResource {
        resource: resource.name.clone(),
        message,
    };

    match &resource.spec {
        ResourceSpec::KeyPair(key) => {
            if key.public_key.trim().is_empty() {
                return Err(invalid("public key is empty".to_string()));
            }
        }
        ResourceSpec::Network(network) => {
            parse_cidr(&network.cidr).map_err(invalid)?;
        }
        ResourceSpec::Subnet(subnet) => {
            let child = parse_cidr(&subnet.cidr).map_err(invalid)?;
            expect_kind(cluster, resource, &subnet.network, ResourceKind::Network)?;
            if let Some(ResourceSpec::Network(parent)) =
                cluster.resource(&subnet.network).map(|r| &r.spec)
            {
                let parent = parse_cidr(&parent.cidr).map_err(invalid)?;
                if !cidr_contains(parent, child) {
                    return Err(invalid(format!(
                        "{} is not inside network {} ({})",
                        subnet.cidr,
                        subnet.network,
                        format_cidr(parent)
                    )));
                }
            }
        }
        ResourceSpec::Firewall(firewall) => {
            for rule in &firewall.rules {
                if !matches!(rule.protocol.as_str(), "tcp" | "udp" | "icmp") {
                    return Err(invalid(format!("unsupported protocol {}", rule.protocol)));
                }
                parse_cidr(&rule.source).map_err(invalid)?;
            }
        }
        ResourceSpec::ServerPool(pool) => {
            if pool.size.trim().is_empty() || pool.image.trim().is_empty() {
                return Err(invalid("size and image are required".to_string()));
            }
            if pool.bootstrap.trim().is_empty() {
                return Err(invalid("bootstrap template is required".to_string()));
            }
            if pool.role == crate::model::NodeRole::Master && pool.count == 0 {
                return Err(invalid("a master pool needs at least one instance".to_string()));
            }
            if let Some(key) = &pool.key_pair {
                expect_kind(cluster, resource, key, ResourceKind::KeyPair)?;
            }
            if let Some(network) = &pool.network {
                expect_kind(cluster, resource, network, ResourceKind::Network)?;
            }
            if let Some(subnet) = &pool.subnet {
                expect_kind(cluster, resource, subnet, ResourceKind::Subnet)?;
            }
            for firewall in &pool.firewalls {
                expect_kind(cluster, resource, firewall, ResourceKind::Firewall)?;
            }
        }
        ResourceSpec::LoadBalancer(lb) => {
            expect_kind(cluster, resource, &lb.pool, ResourceKind::ServerPool)?;
            if lb.forwarding.is_empty() {
                return Err(invalid("at least one forward rule is required".to_string()));
            }
        }
    }

    for dep in &resource.depends_on {
        if cluster.resource(dep).is_none() {
            return Err(ClusterError::UnknownDependency {
                resource: resource.name.clone(),
                dependency: dep.clone(),
            });
        }
    }

    Ok(())
}

fn expect_kind(
    cluster: &Cluster,
    resource: &Resource,
    reference: &str,
    expected: ResourceKind,
) -> Result<()> {
    let target = cluster
        .resource(reference)
        .ok_or_else(|| ClusterError::UnknownDependency {
            resource: resource.name.clone(),
            dependency: reference.to_string(),
        })?;
    if target.kind() != expected {
        return Err(ClusterError::WrongReferenceKind {
            resource: resource.name.clone(),
            reference: reference.to_string(),
            expected,
            found: target.kind(),
        });
    }
    Ok(())
}

/// Parse `a.b.c.d/n`
pub fn parse_cidr(value: &str) -> std::result::Result<(Ipv4Addr, u8), String> {
    let (addr, prefix) = value
        .split_once('/')
        .ok_or_else(|| format!("invalid CIDR: {value}"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| format!("invalid CIDR: {value}"))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| format!("invalid CIDR prefix: {value}"))?;
    Ok((addr, prefix))
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

/// Whether `child` lies entirely inside `parent`
pub fn cidr_contains(parent: (Ipv4Addr, u8), child: (Ipv4Addr, u8)) -> bool {
    if child.1 < parent.1 {
        return false;
    }
    let m = mask(parent.1);
    (u32::from(parent.0) & m) == (u32::from(child.0) & m)
}

fn format_cidr(cidr: (Ipv4Addr, u8)) -> String {
    format!("{}/{}", cidr.0, cidr.1)
}
