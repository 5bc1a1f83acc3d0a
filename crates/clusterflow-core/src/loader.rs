//! Definition loader
//!
//! Parses a definition, resolves key material referenced by path and runs
//! static validation, so callers get a cluster that is ready to reconcile.

use crate::error::{ClusterError, Result};
use crate::model::{Cluster, ResourceSpec};
use crate::parser::{parse_cluster_file, parse_cluster_string};
use crate::validate::validate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Load and validate a definition file.
///
/// Relative `public-key-path` values are resolved against the directory the
/// definition lives in.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_cluster(path: &Path) -> Result<Cluster> {
    let mut cluster = parse_cluster_file(path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    finish(&mut cluster, &base)?;
    Ok(cluster)
}

/// Load and validate a definition held in memory
pub fn load_cluster_str(content: &str, base: &Path) -> Result<Cluster> {
    let mut cluster = parse_cluster_string(content)?;
    finish(&mut cluster, base)?;
    Ok(cluster)
}

fn finish(cluster: &mut Cluster, base: &Path) -> Result<()> {
    resolve_key_material(cluster, base)?;
    let order = validate(cluster)?;
    info!(
        cluster = %cluster.name,
        cloud = %cluster.cloud,
        resources = cluster.resources.len(),
        "Definition loaded"
    );
    debug!(order = ?order, "Validated creation order");
    Ok(())
}

fn resolve_key_material(cluster: &mut Cluster, base: &Path) -> Result<()> {
    for resource in &mut cluster.resources {
        let ResourceSpec::KeyPair(key) = &mut resource.spec else {
            continue;
        };
        if !key.public_key.trim().is_empty() {
            continue;
        }
        let Some(raw) = &key.public_key_path else {
            continue;
        };

        let path = expand_path(raw, base);
        let content = std::fs::read_to_string(&path).map_err(|e| ClusterError::IoError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!(resource = %resource.name, path = %path.display(), "Read public key");
        key.public_key = content.trim().to_string();
    }
    Ok(())
}

/// Expand `~/` and resolve relative paths against `base`
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
