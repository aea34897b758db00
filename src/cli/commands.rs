use crate::cli::{Commands, SnapshotTarget};
use crate::runtime::AgentRuntime;
use crate::Result;
use meshgate_agent::{AgentConfig, Event};
use meshgate_common::MetricKind;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CLUSTER_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handle_command(command: Commands, config: AgentConfig) -> Result<()> {
    match command {
        Commands::Run {
            multi_cluster,
            no_node,
        } => {
            let node_paused = no_node || config.node_watch_paused;
            let multi_cluster_paused = !multi_cluster && config.multi_cluster_watch_paused;
            run(config, node_paused, multi_cluster_paused).await
        }
        Commands::Snapshot { target } => snapshot(config, target).await,
    }
}

async fn run(config: AgentConfig, node_paused: bool, multi_cluster_paused: bool) -> Result<()> {
    let (runtime, events) = AgentRuntime::build(&config).await?;
    runtime.start(node_paused, multi_cluster_paused)?;

    info!(
        "Polling every {}s (node: {}, multi-cluster: {})",
        config.poll_interval_secs,
        if node_paused { "paused" } else { "active" },
        if multi_cluster_paused { "paused" } else { "active" },
    );

    let consumer = tokio::spawn(print_events(events));
    let cancel = runtime.cancellation_token();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = cancel.cancelled() => {}
    }

    runtime.shutdown().await;
    consumer.abort();
    Ok(())
}

/// Write every event to stdout as one JSON document per line
async fn print_events(mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize {} event: {}", event.target, e),
        }
    }
}

async fn snapshot(config: AgentConfig, target: SnapshotTarget) -> Result<()> {
    let (runtime, _events) = AgentRuntime::build(&config).await?;
    runtime.wait_for_cluster_sync(CLUSTER_SYNC_TIMEOUT).await?;

    let mut output = serde_json::Map::new();

    if target.includes_nodes() {
        runtime.collect_once(MetricKind::NodeMetric).await?;
        output.insert(
            "nodes".to_string(),
            json!(runtime.cache.list_node_metrics()?),
        );
    }

    if target.includes_multi_cluster() {
        runtime.collect_once(MetricKind::MultiClusterMetric).await?;
        output.insert(
            "multi_cluster".to_string(),
            runtime.cache.multi_cluster_metric()?,
        );
    }

    println!("{}", serde_json::to_string_pretty(&output)?);

    runtime.shutdown().await;
    Ok(())
}
