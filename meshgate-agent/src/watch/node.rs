//! Node metric collection cycle
//!
//! Each cycle reconciles the cached node set against the cluster, resolves every
//! node's exporter address, pulls usage series from Prometheus and stores them per
//! node. Nodes whose exporter is not found are skipped for the cycle.

use super::{Collector, RateLimiter};
use crate::error::{AgentError, Result, SourceError};
use crate::metric_cache::MetricCache;
use crate::notifier::{Event, Publisher};
use crate::sources::{ClusterObjectCache, InstanceMetric, PrometheusSource};
use async_trait::async_trait;
use log::{debug, warn};
use meshgate_common::{CpuMetric, FieldMapping, MemoryMetric, MetricKind, NetworkMetric};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Usages {
    cpu: Vec<InstanceMetric<CpuMetric>>,
    memory: Vec<InstanceMetric<MemoryMetric>>,
    network: Vec<InstanceMetric<NetworkMetric>>,
}

fn find_instance<'a, M>(metrics: &'a [InstanceMetric<M>], instance: &str) -> Option<&'a M> {
    metrics
        .iter()
        .find(|m| m.instance == instance)
        .map(|m| &m.metric)
}

pub struct NodeMetricCollector {
    cache: MetricCache,
    cluster: Arc<dyn ClusterObjectCache>,
    prometheus: Arc<dyn PrometheusSource>,
    publisher: Arc<dyn Publisher>,
    exporter_port: u16,
    limiter: Mutex<RateLimiter>,
}

impl NodeMetricCollector {
    pub fn new(
        cache: MetricCache,
        cluster: Arc<dyn ClusterObjectCache>,
        prometheus: Arc<dyn PrometheusSource>,
        publisher: Arc<dyn Publisher>,
        exporter_port: u16,
        rate_limit: Duration,
    ) -> Self {
        Self {
            cache,
            cluster,
            prometheus,
            publisher,
            exporter_port,
            limiter: Mutex::new(RateLimiter::new(rate_limit)),
        }
    }

    /// Resolve and store the exporter address of every cached node.
    /// Nodes without an exporter pod get their address cleared.
    /// Returns `(node, instance)` for the nodes that resolved.
    fn resolve_instances(&self) -> Vec<(String, String)> {
        let mut resolved = Vec::new();

        for node in self.cache.list_nodes() {
            let Some(pod) = self.cluster.find_exporter_pod_for_node(&node.name) else {
                debug!("No exporter pod found on node {}", node.name);
                // Drop the stale address; the last collected series stay
                if node.instance.is_some() {
                    if let Err(e) = self.cache.set_node_instance(&node.name, None) {
                        debug!("Could not clear instance of {}: {}", node.name, e);
                    }
                }
                continue;
            };

            let instance = format!("{}:{}", pod.pod_ip, self.exporter_port);
            // Fails only if a concurrent reset dropped the node
            if self
                .cache
                .set_node_instance(&node.name, Some(instance.clone()))
                .is_ok()
            {
                resolved.push((node.name, instance));
            }
        }

        resolved
    }

    async fn query_usages(&self) -> std::result::Result<Usages, SourceError> {
        let (cpu, memory, network) = tokio::try_join!(
            self.prometheus.cpu_usages(),
            self.prometheus.memory_usages(),
            self.prometheus.network_usages(),
        )?;
        Ok(Usages {
            cpu,
            memory,
            network,
        })
    }

    /// Store the series matching `instance`. Returns true if anything was stored.
    fn apply_usages(&self, node: &str, instance: &str, usages: &Usages) -> Result<bool> {
        let mut updated = false;

        if let Some(cpu) = find_instance(&usages.cpu, instance) {
            self.cache.set_node_cpu(node, cpu.clone())?;
            updated = true;
        }
        if let Some(memory) = find_instance(&usages.memory, instance) {
            self.cache.set_node_memory(node, memory.clone())?;
            updated = true;
        }
        if let Some(network) = find_instance(&usages.network, instance) {
            self.cache.set_node_network(node, network.clone())?;
            updated = true;
        }

        Ok(updated)
    }

    fn publish(&self, nodes: &[String]) -> Result<()> {
        if nodes.is_empty() || !self.limiter.lock().try_acquire() {
            return Ok(());
        }

        for name in nodes {
            let Some(node) = self.cache.get_node(name) else {
                continue;
            };
            let event = Event::modified(MetricKind::NodeMetric, node.to_fields()?);
            if let Err(e) = self.publisher.enqueue(event) {
                warn!("Failed to publish metrics of node {}: {}", name, e);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Collector for NodeMetricCollector {
    fn target(&self) -> MetricKind {
        MetricKind::NodeMetric
    }

    async fn collect(&self) -> Result<()> {
        let report = self.cache.reconcile_nodes(&self.cluster.list_node_names());
        if !report.is_empty() {
            debug!(
                "Reconciled nodes: added {:?}, removed {:?}",
                report.added, report.removed
            );
        }

        if !self.prometheus.is_ready().await {
            debug!("Prometheus is not ready, skipping node metric cycle");
            return Ok(());
        }

        let resolved = self.resolve_instances();
        if resolved.is_empty() {
            debug!("No node has a resolved exporter instance, skipping cycle");
            return Ok(());
        }

        let usages = match self.query_usages().await {
            Ok(usages) => usages,
            Err(SourceError::Unreachable(e)) => {
                debug!("Prometheus unreachable: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut updated = Vec::new();
        for (node, instance) in &resolved {
            match self.apply_usages(node, instance, &usages) {
                Ok(true) => updated.push(node.clone()),
                Ok(false) => debug!("No series reported for {} ({})", node, instance),
                // Dropped by a concurrent reset; picked up again next cycle
                Err(AgentError::NodeNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        self.publish(&updated)
    }
}
