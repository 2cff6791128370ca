//! Command execution for the `cluster-tracking` binary

use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use colored::*;
use futures::future::join_all;
use tracing::info;

use cluster_tracking::cli::Commands;
use cluster_tracking::cluster::StaticIdentity;
use cluster_tracking::{ClusterConfig, ClusterTracker, ClusterUniqueId, MemoryRegistry, Registry, SystemClock};

/// Run a parsed command
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Node { config, ids, once } => run_node(load_config(config.as_deref())?, ids, once).await,
        Commands::Simulate { nodes, config } => simulate(load_config(config.as_deref())?, nodes).await,
        Commands::Decode { id } => decode(&id),
    }
}

fn load_config(path: Option<&Path>) -> Result<ClusterConfig> {
    match path {
        Some(path) => ClusterConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ClusterConfig::default()),
    }
}

async fn run_node(config: ClusterConfig, ids: usize, once: bool) -> Result<()> {
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
    let tracker = Arc::new(ClusterTracker::new(registry, config)?);

    let number = tracker.activate().await?;
    println!(
        "{} {} as server {}",
        "Registered".bright_green().bold(),
        tracker.current_server_id().bright_white(),
        number.to_string().bright_cyan()
    );

    for _ in 0..ids {
        println!("{}", tracker.cluster_unique_id()?);
    }

    let heartbeat = tracker.spawn_heartbeat();
    if !once {
        info!("running until interrupted");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    }

    heartbeat.stop().await;
    tracker.deactivate().await?;
    println!("{} {}", "Deregistered".bright_yellow().bold(), tracker.current_server_id());
    Ok(())
}

async fn simulate(config: ClusterConfig, nodes: usize) -> Result<()> {
    if nodes == 0 {
        bail!("at least one node is required");
    }
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());

    let trackers = (0..nodes)
        .map(|i| {
            ClusterTracker::with_parts(
                Arc::clone(&registry),
                config.clone(),
                &StaticIdentity(format!("{}@sim-node", 1000 + i)),
                Arc::new(SystemClock),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let results = join_all(trackers.iter().map(|t| t.activate())).await;
    for (tracker, result) in trackers.iter().zip(results) {
        match result {
            Ok(number) => println!("{:>20}  {}", tracker.current_server_id(), number.to_string().bright_cyan()),
            Err(e) => println!("{:>20}  {} {}", tracker.current_server_id(), "failed:".bright_red(), e),
        }
    }

    let mut servers = trackers[0].all_servers().await?;
    servers.sort_by_key(|entry| entry.server_number);
    println!("{}", serde_json::to_string_pretty(&servers)?);
    Ok(())
}

fn decode(id: &str) -> Result<()> {
    let id: ClusterUniqueId = id.parse()?;
    println!("{:<14} {}", "server number:".bright_white(), id.server_number());
    match id.timestamp() {
        Some(ts) => println!("{:<14} {}", "issued at:".bright_white(), ts.to_rfc3339()),
        None => println!("{:<14} {}ms after epoch", "issued at:".bright_white(), id.delta_millis()),
    }
    Ok(())
}
