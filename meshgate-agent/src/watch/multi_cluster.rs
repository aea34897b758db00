//! Multi-cluster network metric collection cycle
//!
//! Samples the tunnel device's byte counters while the gateway is connected to a
//! configured remote cluster, and stores them under that cluster's endpoint.

use super::{Collector, RateLimiter};
use crate::error::{Result, SourceError};
use crate::metric_cache::{EndpointSample, MetricCache};
use crate::notifier::{Event, Publisher};
use crate::sources::{unix_now, ClusterMetadata, GatewayState, HostCounters, SubmarinerState};
use async_trait::async_trait;
use log::{debug, warn};
use meshgate_common::MetricKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct EmitState {
    limiter: RateLimiter,
    /// An endpoint was created since the last emitted event
    pending_added: bool,
}

pub struct MultiClusterMetricCollector {
    cache: MetricCache,
    counters: Arc<dyn HostCounters>,
    metadata: Arc<dyn ClusterMetadata>,
    submariner: Arc<dyn SubmarinerState>,
    publisher: Arc<dyn Publisher>,
    device: String,
    emit: Mutex<EmitState>,
}

impl MultiClusterMetricCollector {
    pub fn new(
        cache: MetricCache,
        counters: Arc<dyn HostCounters>,
        metadata: Arc<dyn ClusterMetadata>,
        submariner: Arc<dyn SubmarinerState>,
        publisher: Arc<dyn Publisher>,
        device: &str,
        rate_limit: Duration,
    ) -> Self {
        Self {
            cache,
            counters,
            metadata,
            submariner,
            publisher,
            device: device.to_string(),
            emit: Mutex::new(EmitState {
                limiter: RateLimiter::new(rate_limit),
                pending_added: false,
            }),
        }
    }

    /// Name of the connected remote cluster, or `None` if a precondition is not met
    async fn connected_remote(&self) -> Option<String> {
        if !self.counters.device_present(&self.device) {
            debug!("Device {} not present, skipping cycle", self.device);
            return None;
        }
        if !self.counters.counters_present(&self.device) {
            debug!("Counters of {} not present, skipping cycle", self.device);
            return None;
        }

        let remote = match self.metadata.remote_cluster_name() {
            Ok(Some(remote)) => remote,
            Ok(None) => return None,
            Err(e) => {
                debug!("Could not read remote cluster name: {}", e);
                return None;
            }
        };

        if self.submariner.state().await != GatewayState::GatewayConnected {
            return None;
        }

        Some(remote)
    }

    fn read_counters(&self) -> std::result::Result<(u64, u64), SourceError> {
        let rx = self.counters.rx_bytes(&self.device)?;
        let tx = self.counters.tx_bytes(&self.device)?;
        Ok((rx, tx))
    }

    fn publish(&self, created: bool) -> Result<()> {
        let kind_added = {
            let mut emit = self.emit.lock();
            emit.pending_added |= created;

            if !emit.limiter.try_acquire() {
                return Ok(());
            }
            std::mem::take(&mut emit.pending_added)
        };

        let payload = self.cache.multi_cluster_metric()?;
        let event = if kind_added {
            Event::added(MetricKind::MultiClusterMetric, payload)
        } else {
            Event::modified(MetricKind::MultiClusterMetric, payload)
        };

        if let Err(e) = self.publisher.enqueue(event) {
            warn!("Failed to publish multi-cluster metrics: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for MultiClusterMetricCollector {
    fn target(&self) -> MetricKind {
        MetricKind::MultiClusterMetric
    }

    async fn collect(&self) -> Result<()> {
        let Some(remote) = self.connected_remote().await else {
            return Ok(());
        };

        let (rx_bytes, tx_bytes) = match self.read_counters() {
            Ok(counters) => counters,
            Err(SourceError::Missing(e)) | Err(SourceError::Unreachable(e)) => {
                debug!("Counters of {} unavailable: {}", self.device, e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let latency = self.submariner.connection_latency(&remote).await;

        let sample = EndpointSample {
            timestamp: unix_now(),
            rx_bytes,
            tx_bytes,
            latency,
        };
        let created = self.cache.record_endpoint_sample(&remote, sample)?;

        self.publish(created)
    }
}
