use crate::{context, output};
use clusterflow_cloud::StateStore;
use clusterflow_config::Settings;
use clusterflow_reconciler::ReconcileError;
use colored::Colorize;
use std::path::Path;

pub async fn handle(file: Option<&Path>, name: Option<String>, yes: bool) -> anyhow::Result<()> {
    let settings = Settings::load()?;

    // a definition is optional once a snapshot exists
    let (name, definition) = match name {
        Some(name) if file.is_none() => (name, context::try_load_definition(None)?),
        Some(name) => (name, Some(context::load_definition(file)?)),
        None => {
            let cluster = context::load_definition(file)?;
            (cluster.name.clone(), Some(cluster))
        }
    };
    let definition = definition.filter(|cluster| cluster.name == name);

    let store = context::state_store(&settings)?;
    let snapshot = store.get(&name).await.map_err(ReconcileError::State)?;
    let target = match (&snapshot, &definition) {
        (Some(snapshot), _) => snapshot.cluster.clone(),
        (None, Some(cluster)) => cluster.clone(),
        (None, None) => return Err(ReconcileError::ClusterNotFound(name).into()),
    };

    if !yes {
        let prompt = format!(
            "Delete every resource of cluster '{}' on {}?",
            name, target.cloud
        );
        if !context::confirm(&prompt)? {
            println!("{}", "Cancelled".yellow());
            return Ok(());
        }
    }

    println!("{} {}", "Deleting cluster".blue(), name.cyan().bold());

    let session = context::session(&target, &settings, store)?;
    let plan = session.destroy(&name, definition.as_ref()).await?;

    output::print_plan(&plan);
    println!();
    println!(
        "{}",
        format!("✓ Cluster '{}' deleted", name).green().bold()
    );
    Ok(())
}
