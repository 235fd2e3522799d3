//! `abx ps` — List application containers.

use appbox_common::config::AppboxConfig;
use appbox_runtime::container::Container;
use clap::Args;

use crate::output::{format_bytes, format_uptime};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Only containers of this namespace.
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the backend cannot be queried.
pub fn execute(config: &AppboxConfig, args: &PsArgs) -> anyhow::Result<()> {
    let engine = super::engine(config)?;
    let containers = match &args.namespace {
        Some(ns) => engine.registry().find_in_namespace(ns)?,
        None => engine.registry().list()?,
    };

    if args.json {
        let rows: Vec<_> = containers.iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<34} {:<32} {:<9} {:<10} {:<16} {:<12} {:<10}",
        "CONTAINER ID", "IDENTITY", "CATEGORY", "STATE", "IP", "UPTIME", "MEMORY"
    );
    for c in &containers {
        let memory = c
            .stats()
            .ok()
            .filter(|s| s.memory_usage_bytes > 0)
            .map_or_else(|| "-".to_string(), |s| format_bytes(s.memory_usage_bytes));
        println!(
            "{:<34} {:<32} {:<9} {:<10} {:<16} {:<12} {:<10}",
            c.id().as_str(),
            replica_label(c),
            c.category().as_str(),
            c.state().to_string(),
            c.ip().map_or_else(|| "-".to_string(), |ip| ip.to_string()),
            c.uptime().map_or_else(|| "-".to_string(), format_uptime),
            memory,
        );
    }
    Ok(())
}

fn replica_label(c: &Container) -> String {
    match c.replica() {
        0 => c.identity().to_string(),
        n => format!("{}.{n}", c.identity()),
    }
}

fn to_json(c: &Container) -> serde_json::Value {
    serde_json::json!({
        "id": c.id().as_str(),
        "name": c.name(),
        "namespace": c.namespace(),
        "service": c.service_name(),
        "plugin": c.plugin_tag(),
        "category": c.category(),
        "replica": c.replica(),
        "state": c.state(),
        "ip": c.ip(),
        "uptime_secs": c.uptime().map(|d| d.as_secs()),
    })
}
