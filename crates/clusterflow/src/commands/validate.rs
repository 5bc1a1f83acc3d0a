use crate::context;
use clusterflow_config::Settings;
use clusterflow_core::ResourceSpec;
use clusterflow_reconciler::ReconcileError;
use colored::Colorize;
use std::path::Path;

/// Everything that can be checked without credentials or cloud calls
pub fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "Validating definition...".blue());

    let settings = Settings::load()?;
    let path = context::definition_path(file)?;
    println!("Definition: {}", path.display().to_string().cyan());

    let cluster = clusterflow_core::load_cluster(&path)?;

    let supported = context::supported_kinds(cluster.cloud);
    if let Some(resource) = cluster
        .resources
        .iter()
        .find(|r| !supported.contains(&r.kind()))
    {
        return Err(ReconcileError::UnsupportedKind {
            resource: resource.name.clone(),
            kind: resource.kind(),
            provider: cluster.cloud.to_string(),
        }
        .into());
    }
    context::check_definition(&cluster).map_err(|source| ReconcileError::ProviderRestriction {
        provider: cluster.cloud.to_string(),
        source,
    })?;

    let injector = context::build_injector(&settings);
    for (_, pool) in cluster.server_pools() {
        injector.validate(&pool.bootstrap)?;
    }

    let order = clusterflow_core::validate(&cluster)?;

    println!("{}", "✓ Definition is valid".green().bold());
    println!();
    println!("Summary:");
    println!(
        "  cluster: {} ({}, {}), kubernetes {}",
        cluster.name.cyan(),
        cluster.cloud,
        cluster.location,
        cluster.kubernetes_version
    );
    println!("  resources: {}", cluster.resources.len());
    for name in &order {
        let Some(resource) = cluster.resource(name) else {
            continue;
        };
        let detail = match &resource.spec {
            ResourceSpec::ServerPool(pool) => format!(
                " ({} x {}, {}, {})",
                pool.count,
                pool.size,
                pool.role.as_str(),
                pool.bootstrap
            ),
            _ => String::new(),
        };
        println!(
            "    - {} {}{}",
            resource.kind().to_string().dimmed(),
            name.cyan(),
            detail
        );
    }
    Ok(())
}
