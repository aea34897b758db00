//! Agent configuration
//!
//! Every field has a default so a partial YAML document (or none at all) is enough.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Seconds between two collection cycles of the same target
    pub poll_interval_secs: u64,
    /// Minimum seconds between two event pushes of the same target
    pub rate_limit_secs: u64,
    pub prometheus_url: String,
    pub prometheus_timeout_secs: u64,
    /// Range covered by usage series queries
    pub query_window_secs: u64,
    pub query_step_secs: u64,
    /// Substring identifying metric-exporter pods
    pub exporter_marker: String,
    pub exporter_port: u16,
    /// Host network device carrying the multi-cluster tunnel
    pub multi_cluster_device: String,
    pub sysfs_root: PathBuf,
    /// Settings file holding the configured remote cluster name
    pub settings_path: PathBuf,
    pub submariner_namespace: String,
    pub event_channel_capacity: usize,
    pub node_watch_paused: bool,
    pub multi_cluster_watch_paused: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            rate_limit_secs: 5,
            prometheus_url: "http://prometheus-k8s.monitoring.svc:9090".to_string(),
            prometheus_timeout_secs: 5,
            query_window_secs: 600,
            query_step_secs: 10,
            exporter_marker: "node-exporter".to_string(),
            exporter_port: 9100,
            multi_cluster_device: "vx-submariner".to_string(),
            sysfs_root: PathBuf::from("/sys"),
            settings_path: PathBuf::from("/etc/meshgate/settings.yaml"),
            submariner_namespace: "submariner-operator".to_string(),
            event_channel_capacity: 1024,
            node_watch_paused: false,
            multi_cluster_watch_paused: true,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(AgentError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.query_step_secs == 0 {
            return Err(AgentError::Config(
                "query_step_secs must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(AgentError::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.prometheus_url.is_empty() {
            return Err(AgentError::Config("prometheus_url is empty".to_string()));
        }
        if self.multi_cluster_device.is_empty() {
            return Err(AgentError::Config(
                "multi_cluster_device is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_secs)
    }

    pub fn prometheus_timeout(&self) -> Duration {
        Duration::from_secs(self.prometheus_timeout_secs)
    }

    pub fn query_window(&self) -> Duration {
        Duration::from_secs(self.query_window_secs)
    }

    pub fn query_step(&self) -> Duration {
        Duration::from_secs(self.query_step_secs)
    }
}
