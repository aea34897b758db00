//! Metric records cached by the agent and handed to publishers

use crate::error::ModelError;
use crate::ring::RingBuffer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A `[timestamp, value]` point of a usage series
pub type Sample = (f64, f64);

/// Conversion between a record and its JSON field mapping
///
/// Records derive serde with `deny_unknown_fields`, so unknown keys, missing keys and
/// wrong-typed values are all reported as `ModelError::Validation`.
pub trait FieldMapping: Serialize + DeserializeOwned {
    /// Build a record from a field mapping
    fn from_fields(fields: Value) -> Result<Self, ModelError> {
        let record: Self =
            serde_json::from_value(fields).map_err(|e| ModelError::Validation(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize the record back to a field mapping
    fn to_fields(&self) -> Result<Value, ModelError> {
        serde_json::to_value(self).map_err(|e| ModelError::Serialization(e.to_string()))
    }

    /// Checks that the type system alone cannot express
    fn validate(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Tag identifying which monitored target an event or record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    NodeMetric,
    MultiClusterMetric,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::NodeMetric => write!(f, "node_metric"),
            MetricKind::MultiClusterMetric => write!(f, "multi_cluster_metric"),
        }
    }
}

/// CPU snapshot: core count and busy-fraction series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CpuMetric {
    pub total: i64,
    pub usages: Vec<Sample>,
}

impl FieldMapping for CpuMetric {
    fn validate(&self) -> Result<(), ModelError> {
        check_total("cpu", self.total)
    }
}

/// Memory snapshot: total bytes and used-bytes series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryMetric {
    pub total: i64,
    pub usages: Vec<Sample>,
}

impl FieldMapping for MemoryMetric {
    fn validate(&self) -> Result<(), ModelError> {
        check_total("memory", self.total)
    }
}

/// Network snapshot for one device: receive and transmit byte-rate series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkMetric {
    pub device: String,
    pub rx_bytes: Vec<Sample>,
    pub tx_bytes: Vec<Sample>,
}

impl FieldMapping for NetworkMetric {
    fn validate(&self) -> Result<(), ModelError> {
        if self.device.is_empty() {
            return Err(ModelError::Validation(
                "network metric device must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_total(what: &str, total: i64) -> Result<(), ModelError> {
    if total < 0 {
        return Err(ModelError::Validation(format!(
            "{} total must not be negative, got {}",
            what, total
        )));
    }
    Ok(())
}

/// Metrics of one cluster node, keyed by node name
///
/// Sub-metrics are replaced wholesale on every successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeMetric {
    pub name: String,
    /// Polling address (`ip:port`) of the node's metric exporter, once discovered
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub cpu_metric: Option<CpuMetric>,
    #[serde(default)]
    pub memory_metric: Option<MemoryMetric>,
    #[serde(default)]
    pub network_metric: Option<NetworkMetric>,
}

impl NodeMetric {
    /// Fresh entry with no instance and no sub-metrics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
            cpu_metric: None,
            memory_metric: None,
            network_metric: None,
        }
    }

    /// True if at least one sub-metric has been collected
    pub fn has_metrics(&self) -> bool {
        self.cpu_metric.is_some() || self.memory_metric.is_some() || self.network_metric.is_some()
    }
}

impl FieldMapping for NodeMetric {
    fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::Validation(
                "node metric name must not be empty".to_string(),
            ));
        }
        if let Some(cpu) = &self.cpu_metric {
            cpu.validate()?;
        }
        if let Some(memory) = &self.memory_metric {
            memory.validate()?;
        }
        if let Some(network) = &self.network_metric {
            network.validate()?;
        }
        Ok(())
    }
}

/// Network series of one remote cluster connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointNetworkMetric {
    pub name: String,
    #[serde(default)]
    pub latencies: RingBuffer<f64>,
    #[serde(default)]
    pub tx_bytes: RingBuffer<u64>,
    #[serde(default)]
    pub rx_bytes: RingBuffer<u64>,
}

impl EndpointNetworkMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latencies: RingBuffer::default(),
            tx_bytes: RingBuffer::default(),
            rx_bytes: RingBuffer::default(),
        }
    }
}

impl FieldMapping for EndpointNetworkMetric {
    fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::Validation(
                "endpoint name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Multi-cluster network state: endpoint name -> endpoint series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiClusterMetric {
    endpoints: BTreeMap<String, EndpointNetworkMetric>,
}

impl MultiClusterMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointNetworkMetric> {
        self.endpoints.get(name)
    }

    /// Get the endpoint entry, creating an empty one on first use.
    ///
    /// The flag is true when the entry was created by this call.
    pub fn endpoint_entry(&mut self, name: &str) -> (&mut EndpointNetworkMetric, bool) {
        let created = !self.endpoints.contains_key(name);
        let endpoint = self
            .endpoints
            .entry(name.to_string())
            .or_insert_with(|| EndpointNetworkMetric::new(name));
        (endpoint, created)
    }

    pub fn remove(&mut self, name: &str) -> Option<EndpointNetworkMetric> {
        self.endpoints.remove(name)
    }

    pub fn clear(&mut self) {
        self.endpoints.clear();
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointNetworkMetric> {
        self.endpoints.values()
    }
}

impl FieldMapping for MultiClusterMetric {
    fn validate(&self) -> Result<(), ModelError> {
        for (key, endpoint) in &self.endpoints {
            endpoint.validate()?;
            if key != &endpoint.name {
                return Err(ModelError::Validation(format!(
                    "endpoint keyed as {} is named {}",
                    key, endpoint.name
                )));
            }
        }
        Ok(())
    }
}
