//! Observed resource state and provider call arguments

use clusterflow_core::naming;
use clusterflow_core::{Instance, Properties, ResourceKind};
use serde::{Deserialize, Serialize};

/// A resource as a provider reports it, or as the definition expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,

    /// Logical name; empty when a provider object carries no resource tag
    pub name: String,

    /// Provider-assigned identity
    pub identity: String,

    /// Deterministic provider-side name
    pub provider_name: String,

    /// Comparable fields
    #[serde(default)]
    pub properties: Properties,

    /// Provider-generated fields (status, addresses, timestamps)
    #[serde(default)]
    pub attributes: Properties,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Running instances, server pools only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<Instance>,
}

impl ResourceState {
    pub fn new(
        kind: ResourceKind,
        identity: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: String::new(),
            identity: identity.into(),
            provider_name: provider_name.into(),
            properties: Properties::new(),
            attributes: Properties::new(),
            tags: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Logical name recovered from the resource tag, if any
    pub fn tagged_name(&self) -> Option<&str> {
        naming::logical_name_from_tags(self.tags.iter().map(String::as_str))
    }
}

/// Selects provider objects belonging to a cluster, optionally narrowed to
/// one logical resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub cluster: String,
    pub name: Option<String>,
}

impl Filter {
    /// Everything owned by `cluster`
    pub fn cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            name: None,
        }
    }

    /// The objects backing one logical resource
    pub fn resource(cluster: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            name: Some(name.into()),
        }
    }

    /// Whether `state` belongs to this filter.
    ///
    /// Tags are checked first. Objects that cannot carry tags are matched on
    /// their deterministic provider-side name instead.
    pub fn matches(&self, kind: ResourceKind, state: &ResourceState) -> bool {
        let owned = state
            .tags
            .iter()
            .any(|t| *t == naming::cluster_tag(&self.cluster));

        let Some(name) = &self.name else {
            return owned;
        };

        if owned && state.tagged_name() == Some(naming::sanitize(name).as_str()) {
            return true;
        }

        if kind == ResourceKind::ServerPool {
            naming::parse_instance_index(&self.cluster, name, &state.provider_name).is_some()
        } else {
            state.provider_name == naming::resource_name(&self.cluster, name)
        }
    }
}

/// Everything a provider needs to create one object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateRequest {
    pub kind: ResourceKind,
    pub cluster: String,

    /// Logical name
    pub name: String,

    /// Deterministic provider-side name
    pub provider_name: String,

    pub tags: Vec<String>,

    /// Declared, comparable fields
    pub properties: Properties,

    /// Provider identities of referenced resources (`network_id`,
    /// `key_pair_id`, `firewall_ids`, `pool_tag`, ...)
    pub references: Properties,

    /// Instance index, server pools only
    pub index: Option<u32>,

    /// Rendered bootstrap payload, server pools only
    pub user_data: Option<String>,
}

impl CreateRequest {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn reference_str(&self, key: &str) -> Option<&str> {
        self.references.get(key).and_then(|v| v.as_str())
    }

    pub fn reference_list(&self, key: &str) -> Vec<&str> {
        self.references
            .get(key)
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}
