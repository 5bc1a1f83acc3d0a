use clusterflow_cloud::{Diff, Plan, StateSnapshot};
use clusterflow_core::{Cluster, ResourceSpec};
use colored::{ColoredString, Colorize};

fn marker(diff: &Diff) -> ColoredString {
    match diff {
        Diff::NoChange => "=".dimmed(),
        Diff::Create => "+".green().bold(),
        Diff::Update(_) => "~".yellow().bold(),
        Diff::Replace(_) => "±".red().bold(),
        Diff::Delete => "-".red().bold(),
    }
}

pub fn print_plan(plan: &Plan) {
    if plan.changes.is_empty() {
        println!("  (no resources)");
    }
    for change in &plan.changes {
        println!(
            "  {} {} {}  {}",
            marker(&change.diff),
            change.kind.to_string().dimmed(),
            change.name.cyan(),
            change.diff
        );
    }
    println!();
    println!("{} {}", "Plan:".bold(), plan.summary());
}

pub fn print_cluster(cluster: &Cluster) {
    println!(
        "{} {} ({}, {}), kubernetes {}",
        "Cluster".bold(),
        cluster.name.cyan().bold(),
        cluster.cloud,
        cluster.location,
        cluster.kubernetes_version
    );
    if let Some(endpoint) = &cluster.api_endpoint {
        println!("  API endpoint: {}", endpoint.green());
    }

    println!("  Resources: {}", cluster.resources.len());
    for resource in &cluster.resources {
        let identity = resource.identity.as_deref().unwrap_or("(not created)");
        println!(
            "    - {} {} {}",
            resource.kind().to_string().dimmed(),
            resource.name.cyan(),
            identity.dimmed()
        );

        if let ResourceSpec::ServerPool(pool) = &resource.spec {
            println!(
                "      {} {}/{} instance(s)",
                pool.role.as_str(),
                pool.instances.len(),
                pool.count
            );
            for instance in &pool.instances {
                println!(
                    "        {} {}  private {}  public {}",
                    instance.name,
                    instance.id.dimmed(),
                    instance.private_ip.as_deref().unwrap_or("-"),
                    instance.public_ip.as_deref().unwrap_or("-")
                );
            }
        }
    }
}

pub fn print_snapshot(snapshot: &StateSnapshot) {
    print_cluster(&snapshot.cluster);
    println!(
        "  Last converged: {}",
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}
