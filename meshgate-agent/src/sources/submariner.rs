//! Submariner gateway state read from the `Gateway` custom resources
//!
//! The submariner gateway engine publishes one `submariner.io/v1` `Gateway` object
//! per gateway node. The active one lists its tunnels under `status.connections`,
//! each with the remote cluster id and measured round-trip latency.

use super::{GatewayState, SubmarinerState};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use log::debug;
use serde_json::Value;

const HA_ACTIVE: &str = "active";
const CONNECTED: &str = "connected";

pub struct KubeSubmarinerState {
    gateways: Api<DynamicObject>,
}

impl KubeSubmarinerState {
    pub fn new(client: Client, namespace: &str) -> Self {
        let gvk = GroupVersionKind::gvk("submariner.io", "v1", "Gateway");
        let resource = ApiResource::from_gvk(&gvk);

        Self {
            gateways: Api::namespaced_with(client, namespace, &resource),
        }
    }

    async fn list_gateways(&self) -> Option<Vec<DynamicObject>> {
        match self.gateways.list(&ListParams::default()).await {
            Ok(list) => Some(list.items),
            Err(e) => {
                debug!("Failed to list submariner gateways: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl SubmarinerState for KubeSubmarinerState {
    async fn state(&self) -> GatewayState {
        match self.list_gateways().await {
            Some(gateways) => classify_gateways(&gateways),
            None => GatewayState::Unknown,
        }
    }

    async fn connection_latency(&self, remote_cluster: &str) -> Option<f64> {
        let gateways = self.list_gateways().await?;
        connection_latency_ms(&gateways, remote_cluster)
    }
}

fn active_connections(gateway: &DynamicObject) -> impl Iterator<Item = &Value> {
    let status = gateway.data.get("status");
    let active = status
        .and_then(|s| s.get("haStatus"))
        .and_then(Value::as_str)
        == Some(HA_ACTIVE);

    status
        .filter(|_| active)
        .and_then(|s| s.get("connections"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|c| c.get("status").and_then(Value::as_str) == Some(CONNECTED))
}

pub(crate) fn classify_gateways(gateways: &[DynamicObject]) -> GatewayState {
    if gateways.is_empty() {
        return GatewayState::NotDeployed;
    }

    if gateways.iter().any(|g| active_connections(g).next().is_some()) {
        GatewayState::GatewayConnected
    } else {
        GatewayState::GatewayDisconnected
    }
}

pub(crate) fn connection_latency_ms(gateways: &[DynamicObject], remote_cluster: &str) -> Option<f64> {
    gateways
        .iter()
        .flat_map(active_connections)
        .find(|c| {
            c.pointer("/endpoint/cluster_id").and_then(Value::as_str) == Some(remote_cluster)
        })
        .and_then(|c| c.pointer("/latencyRTT/average"))
        .and_then(Value::as_str)
        .and_then(parse_duration_ms)
}

/// Parse a Go duration string such as `1.52ms`, `850µs` or `1m2.5s` into milliseconds
pub(crate) fn parse_duration_ms(raw: &str) -> Option<f64> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total = 0.0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number.parse().ok()?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let scale = match unit {
            "ns" => 1e-6,
            "us" | "µs" | "μs" => 1e-3,
            "ms" => 1.0,
            "s" => 1e3,
            "m" => 60e3,
            "h" => 3600e3,
            _ => return None,
        };

        total += value * scale;
        rest = next;
    }

    Some(total)
}
