pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Node and multi-cluster network telemetry for a Kubernetes cluster gateway", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to a YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Prometheus base URL")]
    pub prometheus_url: Option<String>,

    #[arg(short, long, global = true, help = "Polling interval in seconds")]
    pub interval: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the polling loops and stream change events as JSON lines")]
    Run {
        #[arg(long, help = "Start with multi-cluster collection active")]
        multi_cluster: bool,

        #[arg(long, help = "Start with node collection paused")]
        no_node: bool,
    },
    #[command(about = "Collect once and print the cached metrics")]
    Snapshot {
        #[arg(short, long, value_enum, default_value_t = SnapshotTarget::All)]
        target: SnapshotTarget,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SnapshotTarget {
    All,
    Node,
    MultiCluster,
}

impl SnapshotTarget {
    pub fn includes_nodes(self) -> bool {
        matches!(self, Self::All | Self::Node)
    }

    pub fn includes_multi_cluster(self) -> bool {
        matches!(self, Self::All | Self::MultiCluster)
    }
}
