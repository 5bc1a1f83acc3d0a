use crate::{context, output};
use clusterflow_config::Settings;
use colored::Colorize;
use std::path::Path;

/// Dry run: queries the cloud, never changes it
pub async fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let cluster = context::load_definition(file)?;

    println!("{} {}", "Planning cluster".blue(), cluster.name.cyan().bold());

    let session = context::session(&cluster, &settings, context::state_store(&settings)?)?;
    let plan = session.plan(&cluster).await?;

    output::print_plan(&plan);
    Ok(())
}
