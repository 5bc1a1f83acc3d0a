//! Deterministic provider-side names and tags
//!
//! Every remote object is named and tagged from `{cluster, logical name}` so a
//! run that crashed after a create can find and adopt the object instead of
//! creating it twice.

use sha2::{Digest, Sha256};

/// Tag prefix carrying the owning cluster
pub const CLUSTER_TAG_PREFIX: &str = "clusterflow-cluster:";

/// Tag prefix carrying the logical resource name
pub const RESOURCE_TAG_PREFIX: &str = "clusterflow-resource:";

/// Lowercase, keep `[a-z0-9-]`, map everything else to `-`
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Provider-side name of a single resource
pub fn resource_name(cluster: &str, logical: &str) -> String {
    format!("{}-{}", sanitize(cluster), sanitize(logical))
}

/// Provider-side name of the `index`-th instance of a server pool
pub fn instance_name(cluster: &str, pool: &str, index: u32) -> String {
    format!("{}-{}", resource_name(cluster, pool), index)
}

/// Recover the instance index from a provider-side instance name
pub fn parse_instance_index(cluster: &str, pool: &str, name: &str) -> Option<u32> {
    let prefix = format!("{}-", resource_name(cluster, pool));
    name.strip_prefix(&prefix)?.parse().ok()
}

pub fn cluster_tag(cluster: &str) -> String {
    format!("{}{}", CLUSTER_TAG_PREFIX, sanitize(cluster))
}

pub fn resource_tag(logical: &str) -> String {
    format!("{}{}", RESOURCE_TAG_PREFIX, sanitize(logical))
}

/// Both ownership tags for a resource
pub fn tags_for(cluster: &str, logical: &str) -> Vec<String> {
    vec![cluster_tag(cluster), resource_tag(logical)]
}

/// Logical resource name carried by a set of tags
pub fn logical_name_from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    tags.into_iter()
        .find_map(|t| t.strip_prefix(RESOURCE_TAG_PREFIX))
}

/// Derive a kubeadm-format join token (`[a-z0-9]{6}.[a-z0-9]{16}`).
///
/// The token is a pure function of the cluster name and `seed`, so retrying a
/// partially created cluster hands new pools the token the first master used.
pub fn derive_join_token(cluster: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"clusterflow-join-token\0");
    hasher.update(cluster.as_bytes());
    hasher.update(b"\0");
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}.{}", &hex[..6], &hex[6..22])
}
