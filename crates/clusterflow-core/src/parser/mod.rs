//! KDL parser
//!
//! Parses a `cluster.kdl` definition into a [`Cluster`]. Resource nodes are
//! handled in [`resource`].

mod resource;

pub use resource::parse_resource;

use crate::error::{ClusterError, Result};
use crate::model::{CloudKind, Cluster};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::Path;

/// Parse a cluster definition file
pub fn parse_cluster_file<P: AsRef<Path>>(path: P) -> Result<Cluster> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| ClusterError::IoError {
        path: path.as_ref().to_path_buf(),
        message: e.to_string(),
    })?;
    parse_cluster_string(&content)
}

/// Parse a cluster definition from a string
pub fn parse_cluster_string(content: &str) -> Result<Cluster> {
    let doc: KdlDocument = content.parse()?;

    let mut clusters = doc.nodes().iter().filter(|n| n.name().value() == "cluster");
    let node = clusters.next().ok_or_else(|| {
        ClusterError::InvalidConfig("definition has no `cluster` node".to_string())
    })?;
    if clusters.next().is_some() {
        return Err(ClusterError::InvalidConfig(
            "a definition may only contain one `cluster` node".to_string(),
        ));
    }

    parse_cluster(node)
}

fn parse_cluster(node: &KdlNode) -> Result<Cluster> {
    let name = first_string(node)
        .ok_or_else(|| ClusterError::InvalidConfig("cluster requires a name".to_string()))?
        .to_string();

    let mut cloud: Option<CloudKind> = None;
    let mut location: Option<String> = None;
    let mut kubernetes_version: Option<String> = None;
    let mut join_token: Option<String> = None;
    let mut resources = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "cloud" | "provider" => {
                    let value = required_string(child, &name)?;
                    cloud = Some(value.parse().map_err(ClusterError::InvalidConfig)?);
                }
                "location" | "region" | "zone" => {
                    location = Some(required_string(child, &name)?.to_string());
                }
                "kubernetes-version" | "kubernetes_version" => {
                    kubernetes_version = Some(required_string(child, &name)?.to_string());
                }
                "join-token" | "join_token" => {
                    join_token = Some(required_string(child, &name)?.to_string());
                }
                _ => resources.push(parse_resource(child)?),
            }
        }
    }

    let cloud = cloud.ok_or_else(|| {
        ClusterError::InvalidConfig(format!("cluster '{name}' requires `cloud`"))
    })?;
    let location = location.ok_or_else(|| {
        ClusterError::InvalidConfig(format!("cluster '{name}' requires `location`"))
    })?;
    let kubernetes_version = kubernetes_version.ok_or_else(|| {
        ClusterError::InvalidConfig(format!("cluster '{name}' requires `kubernetes-version`"))
    })?;

    let mut cluster = Cluster::new(name, cloud, location, kubernetes_version);
    cluster.join_token = join_token;
    cluster.resources = resources;
    Ok(cluster)
}

/// First positional string argument
pub(crate) fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// First positional integer argument
pub(crate) fn first_integer(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

/// All positional string arguments
pub(crate) fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

/// Named property as a string
pub(crate) fn prop_string<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_string())
}

/// Named property as an integer
pub(crate) fn prop_integer(node: &KdlNode, key: &str) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_integer())
}

fn required_string<'a>(node: &'a KdlNode, owner: &str) -> Result<&'a str> {
    first_string(node).ok_or_else(|| ClusterError::InvalidResource {
        resource: owner.to_string(),
        message: format!("`{}` requires a string value", node.name().value()),
    })
}

#[cfg(test)]
mod tests;
