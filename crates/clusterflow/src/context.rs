//! Wiring shared by the cluster commands: definition, settings, provider,
//! state store and the reconciler session.

use clusterflow_bootstrap::{BootstrapInjector, DirectoryAssets, EmbeddedAssets};
use clusterflow_cloud::{CloudProvider, FileStateStore, RetryConfig};
use clusterflow_cloud_digitalocean::{DigitalOceanClient, DigitalOceanError, DigitalOceanProvider};
use clusterflow_cloud_sakura::{SakuraCloudProvider, Usacloud};
use clusterflow_config::{ConfigError, Settings};
use clusterflow_core::{CloudKind, Cluster, ResourceKind};
use clusterflow_reconciler::{ClusterSession, ReconcileOptions, Reconciler};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub fn definition_path(file: Option<&Path>) -> anyhow::Result<PathBuf> {
    match file {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(clusterflow_config::find_cluster_file()?),
    }
}

/// Parse, resolve key material and validate
pub fn load_definition(file: Option<&Path>) -> anyhow::Result<Cluster> {
    let path = definition_path(file)?;
    tracing::info!(path = %path.display(), "Loading definition");
    Ok(clusterflow_core::load_cluster(&path)?)
}

/// The definition when one is given or can be found; `None` only when
/// discovery finds nothing
pub fn try_load_definition(file: Option<&Path>) -> anyhow::Result<Option<Cluster>> {
    match definition_path(file) {
        Ok(path) => Ok(Some(clusterflow_core::load_cluster(&path)?)),
        Err(err)
            if matches!(
                err.downcast_ref::<ConfigError>(),
                Some(ConfigError::ClusterFileNotFound)
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub fn state_store(settings: &Settings) -> anyhow::Result<Arc<FileStateStore>> {
    Ok(Arc::new(FileStateStore::new(settings.state_dir()?)))
}

pub fn supported_kinds(cloud: CloudKind) -> &'static [ResourceKind] {
    match cloud {
        CloudKind::Sakura => &clusterflow_cloud_sakura::SUPPORTED_KINDS,
        CloudKind::DigitalOcean => &clusterflow_cloud_digitalocean::SUPPORTED_KINDS,
    }
}

/// Provider-specific limits a definition must respect beyond the kinds it uses
pub fn check_definition(cluster: &Cluster) -> clusterflow_cloud::Result<()> {
    match cluster.cloud {
        CloudKind::Sakura => clusterflow_cloud_sakura::check_definition(cluster),
        CloudKind::DigitalOcean => Ok(()),
    }
}

pub fn build_provider(
    cluster: &Cluster,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn CloudProvider>> {
    match cluster.cloud {
        CloudKind::Sakura => {
            let zone = if cluster.location.is_empty() {
                settings.sakura.zone.clone().unwrap_or_default()
            } else {
                cluster.location.clone()
            };
            let mut usacloud = Usacloud::new(zone);
            if let Some(program) = &settings.sakura.usacloud_path {
                usacloud = usacloud.with_program(program);
            }
            Ok(Arc::new(SakuraCloudProvider::with_usacloud(usacloud)))
        }
        CloudKind::DigitalOcean => {
            let token = settings
                .digitalocean
                .token
                .clone()
                .ok_or(DigitalOceanError::MissingToken)?;
            let mut client = DigitalOceanClient::new(token)?;
            if let Some(url) = &settings.digitalocean.api_url {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(DigitalOceanProvider::with_client(
                client,
                &cluster.location,
            )))
        }
    }
}

/// Templates from `bootstrap_dir` shadow the built-in ones
pub fn build_injector(settings: &Settings) -> BootstrapInjector {
    match &settings.bootstrap_dir {
        Some(dir) => BootstrapInjector::new(DirectoryAssets::new(dir).with_fallback(EmbeddedAssets)),
        None => BootstrapInjector::new(EmbeddedAssets),
    }
}

pub fn reconcile_options(settings: &Settings) -> ReconcileOptions {
    ReconcileOptions {
        retry: RetryConfig {
            max_attempts: settings.retry.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.retry.initial_delay_ms),
            max_delay: Duration::from_millis(settings.retry.max_delay_ms),
            backoff_multiplier: settings.retry.multiplier,
        },
        concurrency: settings.concurrency.max(1),
    }
}

/// Session for `cluster`'s cloud. Ctrl-C cancels the run at the next
/// provider call boundary.
pub fn session(
    cluster: &Cluster,
    settings: &Settings,
    store: Arc<FileStateStore>,
) -> anyhow::Result<ClusterSession> {
    let provider = build_provider(cluster, settings)?;
    let reconciler = Reconciler::new(
        provider,
        build_injector(settings),
        reconcile_options(settings),
    );

    let cancel = reconciler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupted, stopping after the current cloud call...".yellow()
            );
            cancel.cancel();
        }
    });

    Ok(ClusterSession::new(reconciler, store))
}

pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
