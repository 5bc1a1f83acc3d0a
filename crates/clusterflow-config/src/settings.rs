//! Runtime settings
//!
//! Read from `~/.config/clusterflow/config.yaml` when present, then
//! overridden by environment variables. The resulting value is passed to the
//! reconciler and providers explicitly.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const ENV_STATE_DIR: &str = "CLUSTERFLOW_STATE_DIR";
pub const ENV_CONCURRENCY: &str = "CLUSTERFLOW_CONCURRENCY";
pub const ENV_DIGITALOCEAN_TOKEN: &str = "DIGITALOCEAN_TOKEN";
pub const ENV_SAKURA_ZONE: &str = "SAKURA_ZONE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where cluster snapshots and lock files are kept
    pub state_dir: Option<PathBuf>,

    /// Upper bound on parallel per-instance calls inside one server pool
    pub concurrency: usize,

    pub retry: RetrySettings,

    /// Directory of bootstrap templates that shadows the built-in ones
    pub bootstrap_dir: Option<PathBuf>,

    pub digitalocean: DigitalOceanSettings,

    pub sakura: SakuraSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            concurrency: 4,
            retry: RetrySettings::default(),
            bootstrap_dir: None,
            digitalocean: DigitalOceanSettings::default(),
            sakura: SakuraSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalOceanSettings {
    pub token: Option<String>,
    /// Override for the API base URL
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SakuraSettings {
    pub zone: Option<String>,
    /// Path to the usacloud binary (defaults to `usacloud` on PATH)
    pub usacloud_path: Option<String>,
}

impl Settings {
    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = dirs::config_dir().map(|d| d.join("clusterflow").join("config.yaml"));
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Apply `CLUSTERFLOW_*` and provider environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_var(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = env_var(ENV_CONCURRENCY) {
            self.concurrency = parse_env(ENV_CONCURRENCY, &value)?;
            if self.concurrency == 0 {
                return Err(ConfigError::InvalidEnv {
                    key: ENV_CONCURRENCY.to_string(),
                    value,
                });
            }
        }
        if let Some(token) = env_var(ENV_DIGITALOCEAN_TOKEN) {
            self.digitalocean.token = Some(token);
        }
        if let Some(zone) = env_var(ENV_SAKURA_ZONE) {
            self.sakura.zone = Some(zone);
        }
        Ok(())
    }

    /// Effective state directory (`~/.config/clusterflow/state` by default)
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(crate::get_config_dir()?.join("state")),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
