//! Bootstrap template lookup
//!
//! Templates are opaque bytes keyed by name. The built-in table is compiled
//! into the binary; a directory of `.sh` or gzipped `.sh.gz` files can shadow
//! it.

use crate::error::{BootstrapError, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Named template source
pub trait BootstrapAssets: Send + Sync {
    /// Template bytes for `name`
    fn lookup(&self, name: &str) -> Result<Vec<u8>>;

    /// Every template name this source can serve
    fn names(&self) -> Vec<String>;
}

/// Kubernetes on Ubuntu, DigitalOcean master
pub const DIGITALOCEAN_K8S_UBUNTU_MASTER: &str =
    include_str!("../scripts/digitalocean_k8s_ubuntu_master.sh");

/// Kubernetes on Ubuntu, DigitalOcean node
pub const DIGITALOCEAN_K8S_UBUNTU_NODE: &str =
    include_str!("../scripts/digitalocean_k8s_ubuntu_node.sh");

/// Kubernetes on Ubuntu, Sakura Cloud master
pub const SAKURA_K8S_UBUNTU_MASTER: &str = include_str!("../scripts/sakura_k8s_ubuntu_master.sh");

/// Kubernetes on Ubuntu, Sakura Cloud node
pub const SAKURA_K8S_UBUNTU_NODE: &str = include_str!("../scripts/sakura_k8s_ubuntu_node.sh");

const BUILTIN: [(&str, &str); 4] = [
    ("digitalocean_k8s_ubuntu_master", DIGITALOCEAN_K8S_UBUNTU_MASTER),
    ("digitalocean_k8s_ubuntu_node", DIGITALOCEAN_K8S_UBUNTU_NODE),
    ("sakura_k8s_ubuntu_master", SAKURA_K8S_UBUNTU_MASTER),
    ("sakura_k8s_ubuntu_node", SAKURA_K8S_UBUNTU_NODE),
];

/// Get a built-in template by name
pub fn get_builtin_template(name: &str) -> Option<&'static str> {
    let name = name.strip_suffix(".sh").unwrap_or(name);
    BUILTIN
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, body)| *body)
}

/// Templates compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

impl BootstrapAssets for EmbeddedAssets {
    fn lookup(&self, name: &str) -> Result<Vec<u8>> {
        get_builtin_template(name)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| BootstrapError::TemplateNotFound(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        BUILTIN.iter().map(|(name, _)| name.to_string()).collect()
    }
}

/// Templates read from a directory, falling back to another source
pub struct DirectoryAssets {
    dir: PathBuf,
    fallback: Option<Box<dyn BootstrapAssets>>,
}

impl DirectoryAssets {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fallback: None,
        }
    }

    /// Serve names missing from the directory from `fallback`
    pub fn with_fallback(mut self, fallback: impl BootstrapAssets + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    fn read(path: &Path) -> Result<Vec<u8>> {
        let io_err = |e: std::io::Error| BootstrapError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let raw = std::fs::read(path).map_err(io_err)?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut decoded = Vec::new();
            GzDecoder::new(raw.as_slice())
                .read_to_end(&mut decoded)
                .map_err(io_err)?;
            Ok(decoded)
        } else {
            Ok(raw)
        }
    }
}

impl BootstrapAssets for DirectoryAssets {
    fn lookup(&self, name: &str) -> Result<Vec<u8>> {
        let stem = name.strip_suffix(".sh").unwrap_or(name);
        for candidate in [format!("{stem}.sh"), format!("{stem}.sh.gz"), stem.to_string()] {
            let path = self.dir.join(&candidate);
            if path.is_file() {
                debug!(template = name, path = %path.display(), "Using bootstrap template from directory");
                return Self::read(&path);
            }
        }
        match &self.fallback {
            Some(fallback) => fallback.lookup(name),
            None => Err(BootstrapError::TemplateNotFound(name.to_string())),
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .filter_map(|f| {
                        f.strip_suffix(".sh.gz")
                            .or_else(|| f.strip_suffix(".sh"))
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(fallback) = &self.fallback {
            names.extend(fallback.names());
        }
        names.sort();
        names.dedup();
        names
    }
}
