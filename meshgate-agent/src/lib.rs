//! Node telemetry agent for the meshgate cluster gateway
//!
//! Responsibilities:
//! - Keep node and multi-cluster metrics in a shared, bounded cache
//! - Reconcile cached nodes against the live cluster
//! - Run one pausable polling loop per monitored target
//! - Emit rate-limited change events to a single downstream consumer

pub mod config;
pub mod error;
pub mod k8s_watcher;
pub mod metric_cache;
pub mod notifier;
pub mod sources;
pub mod watch;

pub use config::AgentConfig;
pub use error::{AgentError, Result, SourceError};
pub use metric_cache::{EndpointSample, MetricCache, ReconcileReport};
pub use notifier::{ChannelNotifier, Event, EventKind, Publisher};
pub use watch::{Collector, MultiClusterMetricCollector, NodeMetricCollector, WatchSupervisor};
