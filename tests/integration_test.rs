use async_trait::async_trait;
use meshgate::error::MeshgateError;
use meshgate_agent::sources::{
    ClusterMetadata, ClusterObjectCache, ExporterPod, GatewayState, HostCounters,
    InstanceMetric, PrometheusSource, SubmarinerState,
};
use meshgate_agent::{
    AgentError, ChannelNotifier, EventKind, MetricCache, MultiClusterMetricCollector,
    NodeMetricCollector, SourceError, WatchSupervisor,
};
use meshgate_agent::Collector;
use meshgate_common::{CpuMetric, MemoryMetric, MetricKind, NetworkMetric};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

type SourceResult<T> = std::result::Result<T, SourceError>;

struct SingleNodeCluster;

impl ClusterObjectCache for SingleNodeCluster {
    fn list_node_names(&self) -> HashSet<String> {
        HashSet::from(["n1".to_string()])
    }

    fn find_exporter_pod_for_node(&self, node_name: &str) -> Option<ExporterPod> {
        (node_name == "n1").then(|| ExporterPod {
            name: "node-exporter-abcde".to_string(),
            pod_ip: "10.0.0.1".to_string(),
        })
    }
}

struct FourCorePrometheus;

#[async_trait]
impl PrometheusSource for FourCorePrometheus {
    async fn is_ready(&self) -> bool {
        true
    }

    async fn cpu_usages(&self) -> SourceResult<Vec<InstanceMetric<CpuMetric>>> {
        Ok(vec![InstanceMetric {
            instance: "10.0.0.1:9100".to_string(),
            metric: CpuMetric {
                total: 4,
                usages: vec![(1700000000.0, 0.25)],
            },
        }])
    }

    async fn memory_usages(&self) -> SourceResult<Vec<InstanceMetric<MemoryMetric>>> {
        Ok(Vec::new())
    }

    async fn network_usages(&self) -> SourceResult<Vec<InstanceMetric<NetworkMetric>>> {
        Ok(Vec::new())
    }
}

struct TunnelCounters;

impl HostCounters for TunnelCounters {
    fn device_present(&self, _device: &str) -> bool {
        true
    }

    fn counters_present(&self, _device: &str) -> bool {
        true
    }

    fn rx_bytes(&self, _device: &str) -> SourceResult<u64> {
        Ok(100)
    }

    fn tx_bytes(&self, _device: &str) -> SourceResult<u64> {
        Ok(200)
    }
}

struct NoRemoteCluster;

impl ClusterMetadata for NoRemoteCluster {
    fn remote_cluster_name(&self) -> SourceResult<Option<String>> {
        Ok(None)
    }
}

struct ConnectedGateway;

#[async_trait]
impl SubmarinerState for ConnectedGateway {
    async fn state(&self) -> GatewayState {
        GatewayState::GatewayConnected
    }
}

fn node_collector(cache: &MetricCache, notifier: &ChannelNotifier) -> Arc<NodeMetricCollector> {
    Arc::new(NodeMetricCollector::new(
        cache.clone(),
        Arc::new(SingleNodeCluster),
        Arc::new(FourCorePrometheus),
        Arc::new(notifier.clone()),
        9100,
        Duration::from_secs(5),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_node_watch_end_to_end() {
    let cache = MetricCache::new();
    let (notifier, mut events) = ChannelNotifier::new(16);
    let supervisor = WatchSupervisor::new(Duration::from_secs(2));

    supervisor
        .spawn(node_collector(&cache, &notifier), false)
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Modified);
    assert_eq!(event.target, MetricKind::NodeMetric);
    assert_eq!(event.payload["name"], "n1");
    assert_eq!(event.payload["instance"], "10.0.0.1:9100");
    assert_eq!(event.payload["cpu_metric"]["total"], 4);

    let node = cache.get_node("n1").unwrap();
    assert_eq!(node.cpu_metric.unwrap().total, 4);

    // Cycles at 2s and 4s fall inside the rate-limit window
    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert!(events.try_recv().is_err());

    supervisor.pause(MetricKind::NodeMetric).unwrap();
    assert!(supervisor.is_paused(MetricKind::NodeMetric).unwrap());
    assert!(supervisor
        .pausing_duration(MetricKind::NodeMetric)
        .unwrap()
        .is_some());

    supervisor.shutdown().await;
    assert_eq!(notifier.events_published(), 1);
}

#[tokio::test]
async fn test_multi_cluster_without_remote_is_a_no_op() {
    let cache = MetricCache::new();
    let (notifier, mut events) = ChannelNotifier::new(16);

    let collector = MultiClusterMetricCollector::new(
        cache.clone(),
        Arc::new(TunnelCounters),
        Arc::new(NoRemoteCluster),
        Arc::new(ConnectedGateway),
        Arc::new(notifier),
        "vx-submariner",
        Duration::from_secs(5),
    );

    collector.collect().await.unwrap();

    assert!(cache.multi_cluster().is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_reconcile_replaces_departed_nodes() {
    let cache = MetricCache::new();
    for name in ["a", "b", "c"] {
        cache.upsert_node(name);
    }
    cache
        .set_node_cpu(
            "b",
            CpuMetric {
                total: 2,
                usages: Vec::new(),
            },
        )
        .unwrap();

    let live: HashSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let report = cache.reconcile_nodes(&live);

    assert_eq!(report.added, vec!["d".to_string()]);
    assert_eq!(report.removed, vec!["a".to_string()]);

    let names: Vec<String> = cache.list_nodes().into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec!["b", "c", "d"]);
    assert_eq!(cache.get_node("b").unwrap().cpu_metric.unwrap().total, 2);
}

#[test]
fn test_supervisor_rejects_unknown_target() {
    let supervisor = WatchSupervisor::new(Duration::from_secs(2));

    assert!(matches!(
        supervisor.pause(MetricKind::MultiClusterMetric),
        Err(AgentError::UnknownTarget(MetricKind::MultiClusterMetric))
    ));
}

#[test]
fn test_error_types() {
    let err = MeshgateError::from(AgentError::NodeNotFound("worker-1".to_string()));
    assert!(err.to_string().contains("worker-1"));

    let err = MeshgateError::SyncTimeout(10);
    assert!(err.to_string().contains("10 seconds"));
}

#[test]
fn test_version_const() {
    assert!(!meshgate::VERSION.is_empty());
}
