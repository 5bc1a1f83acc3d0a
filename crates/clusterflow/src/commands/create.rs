use crate::{context, output};
use clusterflow_config::Settings;
use colored::Colorize;
use std::path::Path;

pub async fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let cluster = context::load_definition(file)?;

    println!(
        "{} {} on {} ({})",
        "Creating cluster".blue(),
        cluster.name.cyan().bold(),
        cluster.cloud,
        cluster.location
    );

    let session = context::session(&cluster, &settings, context::state_store(&settings)?)?;
    let report = session.create(&cluster).await?;

    output::print_plan(&report.plan);
    println!();
    println!(
        "{}",
        format!("✓ Cluster '{}' created", report.cluster.name)
            .green()
            .bold()
    );
    output::print_cluster(&report.cluster);
    Ok(())
}
