//! Dependency ordering
//!
//! Producers (networks, key pairs) must exist before their consumers (subnets,
//! server pools). The order is a stable topological sort: among resources
//! that are ready at the same time, declaration order wins, so an unchanged
//! definition always yields the same apply order.

use crate::error::{ClusterError, Result};
use crate::model::{NodeRole, Resource};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Resource names in declaration order
    names: Vec<String>,
    /// name -> names it depends on
    dependencies: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph for a set of resources.
    ///
    /// Node pools implicitly depend on every master pool, since their
    /// bootstrap payload needs the API endpoint the masters expose.
    pub fn build(resources: &[Resource]) -> Result<Self> {
        let names: Vec<String> = resources.iter().map(|r| r.name.clone()).collect();
        let known: HashSet<&str> = names.iter().map(String::as_str).collect();

        let masters: Vec<&str> = resources
            .iter()
            .filter(|r| {
                r.as_server_pool()
                    .is_some_and(|pool| pool.role == NodeRole::Master)
            })
            .map(|r| r.name.as_str())
            .collect();

        let mut dependencies = HashMap::new();
        for resource in resources {
            let mut deps = resource.dependencies();
            for dep in &deps {
                if !known.contains(dep.as_str()) {
                    return Err(ClusterError::UnknownDependency {
                        resource: resource.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            if resource
                .as_server_pool()
                .is_some_and(|pool| pool.role == NodeRole::Node)
            {
                for master in &masters {
                    if !deps.iter().any(|d| d == master) {
                        deps.push(master.to_string());
                    }
                }
            }

            dependencies.insert(resource.name.clone(), deps);
        }

        Ok(Self {
            names,
            dependencies,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resources that directly depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.names
            .iter()
            .filter(|n| self.dependencies_of(n).iter().any(|d| d == name))
            .map(String::as_str)
            .collect()
    }

    /// Order in which resources must be created
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut order: Vec<String> = Vec::with_capacity(self.names.len());

        while order.len() < self.names.len() {
            // Kahn's algorithm, taking the first ready node in declaration order
            let next = self.names.iter().find(|name| {
                !placed.contains(name.as_str())
                    && self
                        .dependencies_of(name)
                        .iter()
                        .all(|dep| placed.contains(dep.as_str()))
            });

            let Some(next) = next else {
                let stuck: Vec<&str> = self
                    .names
                    .iter()
                    .map(String::as_str)
                    .filter(|n| !placed.contains(n))
                    .collect();
                return Err(ClusterError::CircularDependency(format!(
                    "cannot order resources: {}",
                    stuck.join(", ")
                )));
            };

            placed.insert(next.as_str());
            order.push(next.clone());
        }

        debug!(order = ?order, "Computed creation order");
        Ok(order)
    }

    /// Order in which resources must be deleted (reverse of creation)
    pub fn deletion_order(&self) -> Result<Vec<String>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }
}

/// Creation order for a set of resources
pub fn topological_order(resources: &[Resource]) -> Result<Vec<String>> {
    DependencyGraph::build(resources)?.creation_order()
}
