use crate::{context, output};
use clusterflow_cloud::StateStore;
use clusterflow_config::Settings;
use clusterflow_reconciler::ReconcileError;
use std::path::Path;

pub async fn handle(file: Option<&Path>, name: Option<String>, json: bool) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let name = match name {
        Some(name) => name,
        None => context::load_definition(file)?.name,
    };

    let store = context::state_store(&settings)?;
    let snapshot = store
        .get(&name)
        .await
        .map_err(ReconcileError::State)?
        .ok_or_else(|| ReconcileError::ClusterNotFound(name.clone()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        output::print_snapshot(&snapshot);
    }
    Ok(())
}
