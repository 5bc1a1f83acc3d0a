use crate::{context, output};
use clusterflow_config::Settings;
use colored::Colorize;
use std::path::Path;

pub async fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let cluster = context::load_definition(file)?;

    println!(
        "{} {}",
        "Reconciling cluster".blue(),
        cluster.name.cyan().bold()
    );

    let session = context::session(&cluster, &settings, context::state_store(&settings)?)?;
    let report = session.apply(&cluster).await?;

    if !report.plan.has_changes() {
        println!("{}", "✓ Already up to date".green().bold());
        return Ok(());
    }

    output::print_plan(&report.plan);
    println!();
    println!(
        "{}",
        format!("✓ Cluster '{}' converged", report.cluster.name)
            .green()
            .bold()
    );
    output::print_cluster(&report.cluster);
    Ok(())
}
