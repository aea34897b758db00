//! Process-wide store of the current node and multi-cluster metrics
//!
//! One mutex guards both the node list and the endpoint map, so reconciliation,
//! collector writes and API reads never interleave halfway through an update.
//! The handle is cheap to clone; every clone shares the same state.

use crate::error::{AgentError, Result};
use meshgate_common::{
    CpuMetric, EndpointNetworkMetric, FieldMapping, MemoryMetric, ModelError,
    MultiClusterMetric, NetworkMetric, NodeMetric,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct CacheState {
    /// Insertion ordered, unique by name
    nodes: Vec<NodeMetric>,
    multi_cluster: MultiClusterMetric,
}

impl CacheState {
    fn node_mut(&mut self, name: &str) -> Result<&mut NodeMetric> {
        self.nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| AgentError::NodeNotFound(name.to_string()))
    }
}

/// Node names added and removed by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One multi-cluster counter reading for an endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointSample {
    pub timestamp: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub latency: Option<f64>,
}

/// Thread-safe metric cache shared by the watch loops and the read API
#[derive(Clone, Default)]
pub struct MetricCache {
    inner: Arc<Mutex<CacheState>>,
}

impl MetricCache {
    /// Create a new empty metric cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `name`, inserting a fresh one if it is not cached yet
    pub fn upsert_node(&self, name: &str) -> NodeMetric {
        let mut state = self.inner.lock();

        if let Some(node) = state.nodes.iter().find(|n| n.name == name) {
            return node.clone();
        }

        let node = NodeMetric::new(name);
        state.nodes.push(node.clone());
        node
    }

    pub fn get_node(&self, name: &str) -> Option<NodeMetric> {
        self.inner
            .lock()
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
    }

    /// All cached nodes in insertion order
    pub fn list_nodes(&self) -> Vec<NodeMetric> {
        self.inner.lock().nodes.clone()
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn set_node_instance(&self, name: &str, instance: Option<String>) -> Result<()> {
        self.inner.lock().node_mut(name)?.instance = instance;
        Ok(())
    }

    pub fn set_node_cpu(&self, name: &str, metric: CpuMetric) -> Result<()> {
        self.inner.lock().node_mut(name)?.cpu_metric = Some(metric);
        Ok(())
    }

    pub fn set_node_memory(&self, name: &str, metric: MemoryMetric) -> Result<()> {
        self.inner.lock().node_mut(name)?.memory_metric = Some(metric);
        Ok(())
    }

    pub fn set_node_network(&self, name: &str, metric: NetworkMetric) -> Result<()> {
        self.inner.lock().node_mut(name)?.network_metric = Some(metric);
        Ok(())
    }

    /// Make the cached node set equal to `live`.
    ///
    /// Nodes only in `live` are inserted empty, cached nodes missing from `live` are
    /// dropped, and nodes in both keep their sub-metrics. New nodes are appended in
    /// name order.
    pub fn reconcile_nodes(&self, live: &HashSet<String>) -> ReconcileReport {
        let mut state = self.inner.lock();

        let cached: HashSet<&str> = state.nodes.iter().map(|n| n.name.as_str()).collect();
        let mut added: Vec<String> = live
            .iter()
            .filter(|name| !cached.contains(name.as_str()))
            .cloned()
            .collect();
        added.sort();

        let (kept, departed): (Vec<NodeMetric>, Vec<NodeMetric>) = std::mem::take(&mut state.nodes)
            .into_iter()
            .partition(|n| live.contains(&n.name));

        state.nodes = kept;
        state
            .nodes
            .extend(added.iter().map(|name| NodeMetric::new(name.as_str())));

        ReconcileReport {
            added,
            removed: departed.into_iter().map(|n| n.name).collect(),
        }
    }

    pub fn set_endpoint_latency(&self, endpoint: &str, value: f64, timestamp: f64) -> Result<()> {
        self.append_endpoint(endpoint, |e| e.latencies.append(value, timestamp))
    }

    pub fn set_endpoint_tx_bytes(&self, endpoint: &str, value: u64, timestamp: f64) -> Result<()> {
        self.append_endpoint(endpoint, |e| e.tx_bytes.append(value, timestamp))
    }

    pub fn set_endpoint_rx_bytes(&self, endpoint: &str, value: u64, timestamp: f64) -> Result<()> {
        self.append_endpoint(endpoint, |e| e.rx_bytes.append(value, timestamp))
    }

    /// Append one counter reading to all series of an endpoint under a single lock.
    ///
    /// Returns true if the endpoint entry was created by this call.
    pub fn record_endpoint_sample(&self, endpoint: &str, sample: EndpointSample) -> Result<bool> {
        let mut state = self.inner.lock();
        let (entry, created) = state.multi_cluster.endpoint_entry(endpoint);

        let appended = append_sample(entry, sample);
        if let Err(e) = appended {
            if created {
                state.multi_cluster.remove(endpoint);
            }
            return Err(e.into());
        }

        Ok(created)
    }

    /// Create the endpoint on first write, then run exactly one append on it.
    /// A rejected append leaves the cache as it was.
    fn append_endpoint<F>(&self, endpoint: &str, append: F) -> Result<()>
    where
        F: FnOnce(&mut EndpointNetworkMetric) -> std::result::Result<(), ModelError>,
    {
        let mut state = self.inner.lock();
        let (entry, created) = state.multi_cluster.endpoint_entry(endpoint);

        if let Err(e) = append(entry) {
            if created {
                state.multi_cluster.remove(endpoint);
            }
            return Err(e.into());
        }

        Ok(())
    }

    pub fn endpoint(&self, endpoint: &str) -> Option<EndpointNetworkMetric> {
        self.inner.lock().multi_cluster.endpoint(endpoint).cloned()
    }

    pub fn delete_endpoint(&self, endpoint: &str) -> Option<EndpointNetworkMetric> {
        self.inner.lock().multi_cluster.remove(endpoint)
    }

    pub fn clear_all_endpoints(&self) {
        self.inner.lock().multi_cluster.clear();
    }

    pub fn multi_cluster(&self) -> MultiClusterMetric {
        self.inner.lock().multi_cluster.clone()
    }

    /// Drop every node and endpoint (administrative reset)
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.nodes.clear();
        state.multi_cluster.clear();
    }

    /// Serialized node metrics for the read API
    pub fn list_node_metrics(&self) -> Result<Vec<Value>> {
        self.list_nodes()
            .iter()
            .map(|n| n.to_fields().map_err(AgentError::from))
            .collect()
    }

    /// Serialized multi-cluster state for the read API
    pub fn multi_cluster_metric(&self) -> Result<Value> {
        Ok(self.multi_cluster().to_fields()?)
    }
}

fn append_sample(
    entry: &mut EndpointNetworkMetric,
    sample: EndpointSample,
) -> std::result::Result<(), ModelError> {
    // Validate up front so a bad timestamp cannot leave the series out of step.
    if !sample.timestamp.is_finite() {
        return Err(ModelError::Validation(format!(
            "timestamp must be a finite number, got {}",
            sample.timestamp
        )));
    }

    entry.rx_bytes.append(sample.rx_bytes, sample.timestamp)?;
    entry.tx_bytes.append(sample.tx_bytes, sample.timestamp)?;
    if let Some(latency) = sample.latency {
        entry.latencies.append(latency, sample.timestamp)?;
    }
    Ok(())
}
