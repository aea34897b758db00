//! Interfaces of the external data sources the collectors read
//!
//! Each trait has one production implementation in this crate; tests substitute
//! in-memory fakes.

pub mod prometheus;
pub mod settings;
pub mod submariner;
pub mod sysfs;

use crate::error::SourceError;
use async_trait::async_trait;
use meshgate_common::{CpuMetric, MemoryMetric, NetworkMetric};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub use prometheus::PrometheusClient;
pub use settings::SettingsFileMetadata;
pub use submariner::KubeSubmarinerState;
pub use sysfs::SysfsCounters;

/// Metric-exporter pod scheduled on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterPod {
    pub name: String,
    pub pod_ip: String,
}

/// Live view of the cluster's nodes and pods
pub trait ClusterObjectCache: Send + Sync {
    fn list_node_names(&self) -> HashSet<String>;

    fn find_exporter_pod_for_node(&self, node_name: &str) -> Option<ExporterPod>;
}

/// State of the local submariner deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Unknown,
    NotDeployed,
    GatewayDisconnected,
    GatewayConnected,
}

#[async_trait]
pub trait SubmarinerState: Send + Sync {
    async fn state(&self) -> GatewayState;

    /// Average round-trip latency in milliseconds of the connection to `remote_cluster`
    async fn connection_latency(&self, _remote_cluster: &str) -> Option<f64> {
        None
    }
}

/// Access to the multi-cluster settings of this gateway
pub trait ClusterMetadata: Send + Sync {
    /// `Ok(None)` when no remote cluster is configured
    fn remote_cluster_name(&self) -> Result<Option<String>, SourceError>;
}

/// Byte counters of a host network device
pub trait HostCounters: Send + Sync {
    fn device_present(&self, device: &str) -> bool;

    fn counters_present(&self, device: &str) -> bool;

    fn rx_bytes(&self, device: &str) -> Result<u64, SourceError>;

    fn tx_bytes(&self, device: &str) -> Result<u64, SourceError>;
}

/// A metric reported by Prometheus for one exporter instance (`ip:port`)
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMetric<M> {
    pub instance: String,
    pub metric: M,
}

/// Node usage series served by Prometheus
///
/// Failures to contact the server are reported as `SourceError::Unreachable`.
#[async_trait]
pub trait PrometheusSource: Send + Sync {
    async fn is_ready(&self) -> bool;

    async fn cpu_usages(&self) -> Result<Vec<InstanceMetric<CpuMetric>>, SourceError>;

    async fn memory_usages(&self) -> Result<Vec<InstanceMetric<MemoryMetric>>, SourceError>;

    async fn network_usages(&self) -> Result<Vec<InstanceMetric<NetworkMetric>>, SourceError>;
}

/// Current wall-clock time as fractional Unix seconds, the timestamp unit of every series
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
