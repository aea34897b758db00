//! In-memory stand-ins for the external sources, for collector tests

use crate::error::{Result, SourceError};
use crate::notifier::{Event, Publisher};
use crate::sources::{
    ClusterMetadata, ClusterObjectCache, ExporterPod, GatewayState, HostCounters,
    InstanceMetric, PrometheusSource, SubmarinerState,
};
use async_trait::async_trait;
use meshgate_common::{CpuMetric, MemoryMetric, NetworkMetric};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct FakeCluster {
    pub nodes: Mutex<HashSet<String>>,
    /// node name -> exporter pod IP
    pub exporters: Mutex<HashMap<String, String>>,
}

impl FakeCluster {
    pub fn with_node(self, node: &str, exporter_ip: Option<&str>) -> Self {
        self.nodes.lock().insert(node.to_string());
        if let Some(ip) = exporter_ip {
            self.exporters
                .lock()
                .insert(node.to_string(), ip.to_string());
        }
        self
    }
}

impl ClusterObjectCache for FakeCluster {
    fn list_node_names(&self) -> HashSet<String> {
        self.nodes.lock().clone()
    }

    fn find_exporter_pod_for_node(&self, node_name: &str) -> Option<ExporterPod> {
        self.exporters
            .lock()
            .get(node_name)
            .map(|ip| ExporterPod {
                name: format!("node-exporter-{}", node_name),
                pod_ip: ip.clone(),
            })
    }
}

pub struct FakePrometheus {
    pub ready: Mutex<bool>,
    pub cpu: Mutex<std::result::Result<Vec<InstanceMetric<CpuMetric>>, SourceError>>,
    pub memory: Mutex<std::result::Result<Vec<InstanceMetric<MemoryMetric>>, SourceError>>,
    pub network: Mutex<std::result::Result<Vec<InstanceMetric<NetworkMetric>>, SourceError>>,
}

impl Default for FakePrometheus {
    fn default() -> Self {
        Self {
            ready: Mutex::new(true),
            cpu: Mutex::new(Ok(Vec::new())),
            memory: Mutex::new(Ok(Vec::new())),
            network: Mutex::new(Ok(Vec::new())),
        }
    }
}

impl FakePrometheus {
    pub fn with_cpu(self, instance: &str, total: i64, usages: Vec<(f64, f64)>) -> Self {
        if let Ok(cpu) = &mut *self.cpu.lock() {
            cpu.push(InstanceMetric {
                instance: instance.to_string(),
                metric: CpuMetric { total, usages },
            });
        }
        self
    }

    pub fn with_memory(self, instance: &str, total: i64, usages: Vec<(f64, f64)>) -> Self {
        if let Ok(memory) = &mut *self.memory.lock() {
            memory.push(InstanceMetric {
                instance: instance.to_string(),
                metric: MemoryMetric { total, usages },
            });
        }
        self
    }

    pub fn with_network(self, instance: &str, metric: NetworkMetric) -> Self {
        if let Ok(network) = &mut *self.network.lock() {
            network.push(InstanceMetric {
                instance: instance.to_string(),
                metric,
            });
        }
        self
    }

    pub fn fail_cpu(&self, error: SourceError) {
        *self.cpu.lock() = Err(error);
    }

    pub fn fail_memory(&self, error: SourceError) {
        *self.memory.lock() = Err(error);
    }

    pub fn fail_network(&self, error: SourceError) {
        *self.network.lock() = Err(error);
    }
}

#[async_trait]
impl PrometheusSource for FakePrometheus {
    async fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    async fn cpu_usages(
        &self,
    ) -> std::result::Result<Vec<InstanceMetric<CpuMetric>>, SourceError> {
        self.cpu.lock().clone()
    }

    async fn memory_usages(
        &self,
    ) -> std::result::Result<Vec<InstanceMetric<MemoryMetric>>, SourceError> {
        self.memory.lock().clone()
    }

    async fn network_usages(
        &self,
    ) -> std::result::Result<Vec<InstanceMetric<NetworkMetric>>, SourceError> {
        self.network.lock().clone()
    }
}

pub struct FakeCounters {
    pub device_present: Mutex<bool>,
    pub counters_present: Mutex<bool>,
    pub rx: Mutex<u64>,
    pub tx: Mutex<u64>,
}

impl Default for FakeCounters {
    fn default() -> Self {
        Self {
            device_present: Mutex::new(true),
            counters_present: Mutex::new(true),
            rx: Mutex::new(0),
            tx: Mutex::new(0),
        }
    }
}

impl HostCounters for FakeCounters {
    fn device_present(&self, _device: &str) -> bool {
        *self.device_present.lock()
    }

    fn counters_present(&self, _device: &str) -> bool {
        *self.counters_present.lock()
    }

    fn rx_bytes(&self, _device: &str) -> std::result::Result<u64, SourceError> {
        Ok(*self.rx.lock())
    }

    fn tx_bytes(&self, _device: &str) -> std::result::Result<u64, SourceError> {
        Ok(*self.tx.lock())
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    pub remote: Mutex<Option<String>>,
}

impl ClusterMetadata for FakeMetadata {
    fn remote_cluster_name(&self) -> std::result::Result<Option<String>, SourceError> {
        Ok(self.remote.lock().clone())
    }
}

pub struct FakeSubmariner {
    pub state: Mutex<GatewayState>,
    pub latency: Mutex<Option<f64>>,
}

impl Default for FakeSubmariner {
    fn default() -> Self {
        Self {
            state: Mutex::new(GatewayState::GatewayConnected),
            latency: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SubmarinerState for FakeSubmariner {
    async fn state(&self) -> GatewayState {
        *self.state.lock()
    }

    async fn connection_latency(&self, _remote_cluster: &str) -> Option<f64> {
        *self.latency.lock()
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn enqueue(&self, event: Event) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
