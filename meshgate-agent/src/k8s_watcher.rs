//! Kubernetes node and pod watcher backing the cluster object cache
//!
//! Watches all nodes and pods in the cluster and keeps a local copy of the few fields
//! the node collector needs: node names, and for each pod its node, IP and phase.

use crate::sources::{ClusterObjectCache, ExporterPod};
use anyhow::{Context, Result};
use dashmap::{DashMap, DashSet};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client, Resource,
};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RUNNING: &str = "Running";

/// Pod fields relevant to exporter lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEntry {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
    pub phase: Option<String>,
}

impl PodEntry {
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let status = pod.status.as_ref();

        Some(Self {
            name,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            pod_ip: status.and_then(|s| s.pod_ip.clone()),
            phase: status.and_then(|s| s.phase.clone()),
        })
    }

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Thread-safe local copy of cluster nodes and pods
#[derive(Clone)]
pub struct KubeClusterCache {
    nodes: Arc<DashSet<String>>,
    pods: Arc<DashMap<String, PodEntry>>,
    exporter_marker: String,
    nodes_synced: Arc<AtomicBool>,
    pods_synced: Arc<AtomicBool>,
}

impl KubeClusterCache {
    pub fn new(exporter_marker: &str) -> Self {
        Self {
            nodes: Arc::new(DashSet::new()),
            pods: Arc::new(DashMap::new()),
            exporter_marker: exporter_marker.to_string(),
            nodes_synced: Arc::new(AtomicBool::new(false)),
            pods_synced: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn insert_node(&self, name: &str) {
        self.nodes.insert(name.to_string());
    }

    pub fn remove_node(&self, name: &str) {
        self.nodes.remove(name);
    }

    pub fn insert_pod(&self, entry: PodEntry) {
        self.pods.insert(entry.key(), entry);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.pods.remove(&format!("{}/{}", namespace, name));
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// True once both watches finished their initial listing
    pub fn is_synced(&self) -> bool {
        self.nodes_synced.load(Ordering::Acquire) && self.pods_synced.load(Ordering::Acquire)
    }

    fn is_exporter_on(&self, pod: &PodEntry, node_name: &str) -> bool {
        pod.node_name.as_deref() == Some(node_name)
            && pod.name.contains(&self.exporter_marker)
            && pod.phase.as_deref() == Some(RUNNING)
            && pod.pod_ip.is_some()
    }
}

impl ClusterObjectCache for KubeClusterCache {
    fn list_node_names(&self) -> HashSet<String> {
        self.nodes.iter().map(|n| n.key().clone()).collect()
    }

    /// Lowest-named running exporter pod with an IP on the node
    fn find_exporter_pod_for_node(&self, node_name: &str) -> Option<ExporterPod> {
        self.pods
            .iter()
            .filter(|entry| self.is_exporter_on(entry.value(), node_name))
            .filter_map(|entry| {
                let pod = entry.value();
                pod.pod_ip.clone().map(|pod_ip| ExporterPod {
                    name: pod.name.clone(),
                    pod_ip,
                })
            })
            .min_by(|a, b| a.name.cmp(&b.name))
    }
}

/// Feeds a `KubeClusterCache` from the Kubernetes API
pub struct ClusterWatcher {
    client: Client,
    cache: KubeClusterCache,
}

impl ClusterWatcher {
    pub fn new(client: Client, cache: KubeClusterCache) -> Self {
        Self { client, cache }
    }

    /// Watch nodes and pods until one of the watches gives up.
    /// Both reconnect on their own, so this runs indefinitely and should be spawned.
    pub async fn run(&self) -> Result<()> {
        info!("Starting Kubernetes node and pod watchers...");

        let nodes: Api<Node> = Api::all(self.client.clone());
        let pods: Api<Pod> = Api::all(self.client.clone());

        tokio::try_join!(
            watch_with_backoff(nodes, &self.cache.nodes_synced, |e| self.handle_node(e)),
            watch_with_backoff(pods, &self.cache.pods_synced, |e| self.handle_pod(e)),
        )?;

        Ok(())
    }

    fn handle_node(&self, event: ResyncEvent<Node>) {
        match event {
            ResyncEvent::Apply(node) => {
                if let Some(name) = node.metadata.name.as_deref() {
                    self.cache.insert_node(name);
                }
            }
            ResyncEvent::Delete(node) => {
                if let Some(name) = node.metadata.name.as_deref() {
                    self.cache.remove_node(name);
                    debug!("Removed node {} from cache", name);
                }
            }
            ResyncEvent::Resynced(seen) => {
                self.cache.nodes.retain(|name| seen.contains(name));
                info!(
                    "Node watcher sync complete. Tracking {} nodes",
                    self.cache.nodes.len()
                );
            }
        }
    }

    fn handle_pod(&self, event: ResyncEvent<Pod>) {
        match event {
            ResyncEvent::Apply(pod) => {
                if let Some(entry) = PodEntry::from_pod(&pod) {
                    self.cache.insert_pod(entry);
                }
            }
            ResyncEvent::Delete(pod) => {
                let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
                let name = pod.metadata.name.as_deref().unwrap_or("unknown");
                self.cache.remove_pod(namespace, name);
                debug!("Removed pod {}/{} from cache", namespace, name);
            }
            ResyncEvent::Resynced(seen) => {
                self.cache.pods.retain(|key, _| seen.contains(key));
                info!(
                    "Pod watcher sync complete. Tracking {} pods",
                    self.cache.pod_count()
                );
            }
        }
    }
}

/// Watch event after relist handling: objects seen during a (re)list are
/// reported in `Resynced` so stale entries can be dropped.
enum ResyncEvent<K> {
    Apply(K),
    Delete(K),
    Resynced(HashSet<String>),
}

fn object_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(namespace) => format!("{}/{}", namespace, name),
        None => name.to_string(),
    })
}

async fn watch_with_backoff<K, F>(api: Api<K>, synced: &AtomicBool, mut handle: F) -> Result<()>
where
    K: Resource + Clone + Debug + Send + serde::de::DeserializeOwned + 'static,
    F: FnMut(ResyncEvent<K>),
{
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);

    loop {
        match watch_once(&api, synced, &mut handle).await {
            Ok(_) => {
                warn!("Watch stream ended, reconnecting...");
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                error!("Watch failed: {:#}, reconnecting in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }
    }
}

async fn watch_once<K, F>(api: &Api<K>, synced: &AtomicBool, handle: &mut F) -> Result<()>
where
    K: Resource + Clone + Debug + Send + serde::de::DeserializeOwned + 'static,
    F: FnMut(ResyncEvent<K>),
{
    let mut stream = watcher::watcher(api.clone(), watcher::Config::default()).boxed();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(event) = stream.try_next().await.context("Watch stream error")? {
        match event {
            Event::Init => {
                debug!("Watcher (re)listing");
                seen.clear();
            }
            Event::InitApply(obj) => {
                if let Some(key) = object_key(&obj) {
                    seen.insert(key);
                }
                handle(ResyncEvent::Apply(obj));
            }
            Event::InitDone => {
                handle(ResyncEvent::Resynced(std::mem::take(&mut seen)));
                synced.store(true, Ordering::Release);
            }
            Event::Apply(obj) => handle(ResyncEvent::Apply(obj)),
            Event::Delete(obj) => handle(ResyncEvent::Delete(obj)),
        }
    }

    Ok(())
}
