//! Composition root: wires the Kubernetes-backed sources, the metric cache, the
//! notifier and the watch supervisor together.

use crate::{MeshgateError, Result};
use kube::Client;
use meshgate_agent::k8s_watcher::{ClusterWatcher, KubeClusterCache};
use meshgate_agent::sources::{
    KubeSubmarinerState, PrometheusClient, SettingsFileMetadata, SysfsCounters,
};
use meshgate_agent::{
    AgentConfig, ChannelNotifier, Collector, Event, MetricCache, MultiClusterMetricCollector,
    NodeMetricCollector, WatchSupervisor,
};
use meshgate_common::MetricKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct AgentRuntime {
    pub cache: MetricCache,
    pub supervisor: WatchSupervisor,
    pub notifier: ChannelNotifier,
    cluster: KubeClusterCache,
    node_collector: Arc<NodeMetricCollector>,
    multi_cluster_collector: Arc<MultiClusterMetricCollector>,
    watcher_task: JoinHandle<()>,
}

impl AgentRuntime {
    /// Connect to the cluster and build every component.
    /// Returns the runtime and the receiving end of the event stream.
    pub async fn build(config: &AgentConfig) -> Result<(Self, mpsc::Receiver<Event>)> {
        let client = Client::try_default().await.map_err(|e| {
            MeshgateError::KubernetesError(format!("Failed to create K8s client: {}", e))
        })?;
        info!("Connected to Kubernetes cluster");

        let cluster = KubeClusterCache::new(&config.exporter_marker);
        let watcher = ClusterWatcher::new(client.clone(), cluster.clone());
        let watcher_task = tokio::spawn(async move {
            if let Err(e) = watcher.run().await {
                error!("Cluster watcher stopped: {:#}", e);
            }
        });

        let cache = MetricCache::new();
        let (notifier, events) = ChannelNotifier::new(config.event_channel_capacity);
        let publisher = Arc::new(notifier.clone());

        let prometheus = PrometheusClient::new(
            &config.prometheus_url,
            config.prometheus_timeout(),
            config.query_window(),
            config.query_step(),
        )?;

        let node_collector = Arc::new(NodeMetricCollector::new(
            cache.clone(),
            Arc::new(cluster.clone()),
            Arc::new(prometheus),
            publisher.clone(),
            config.exporter_port,
            config.rate_limit(),
        ));

        let multi_cluster_collector = Arc::new(MultiClusterMetricCollector::new(
            cache.clone(),
            Arc::new(SysfsCounters::with_root(config.sysfs_root.clone())),
            Arc::new(SettingsFileMetadata::new(config.settings_path.clone())),
            Arc::new(KubeSubmarinerState::new(client, &config.submariner_namespace)),
            publisher,
            &config.multi_cluster_device,
            config.rate_limit(),
        ));

        let runtime = Self {
            cache,
            supervisor: WatchSupervisor::new(config.poll_interval()),
            notifier,
            cluster,
            node_collector,
            multi_cluster_collector,
            watcher_task,
        };
        Ok((runtime, events))
    }

    /// Start both polling loops in their configured initial state
    pub fn start(&self, node_paused: bool, multi_cluster_paused: bool) -> Result<()> {
        self.supervisor
            .spawn(self.node_collector.clone(), node_paused)?;
        self.supervisor
            .spawn(self.multi_cluster_collector.clone(), multi_cluster_paused)?;
        Ok(())
    }

    /// Wait until the node and pod watches finished their initial listing
    pub async fn wait_for_cluster_sync(&self, limit: Duration) -> Result<()> {
        let wait = async {
            while !self.cluster.is_synced() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };

        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| MeshgateError::SyncTimeout(limit.as_secs()))?;

        debug!("Cluster cache synced");
        Ok(())
    }

    /// Run a single collection cycle for `target` outside of the polling loops
    pub async fn collect_once(&self, target: MetricKind) -> Result<()> {
        match target {
            MetricKind::NodeMetric => self.node_collector.collect().await?,
            MetricKind::MultiClusterMetric => self.multi_cluster_collector.collect().await?,
        }
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.supervisor.cancellation_token()
    }

    /// Stop the polling loops and the cluster watcher
    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
        self.watcher_task.abort();

        info!(
            "Stopped. {} events published, {} dropped",
            self.notifier.events_published(),
            self.notifier.events_dropped()
        );
    }
}
