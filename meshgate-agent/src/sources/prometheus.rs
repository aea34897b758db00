//! Prometheus HTTP API client for node-exporter usage series
//!
//! Totals come from instant queries, usages from range queries over the configured
//! window. Every result is keyed by the exporter `instance` label (`ip:port`), which
//! the node collector matches against the exporter pod it resolved for each node.

use super::{unix_now, InstanceMetric, PrometheusSource};
use crate::error::{AgentError, SourceError};
use async_trait::async_trait;
use log::debug;
use meshgate_common::{CpuMetric, MemoryMetric, NetworkMetric, Sample};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const CPU_TOTAL: &str = r#"count by (instance) (node_cpu_seconds_total{mode="idle"})"#;
const CPU_USAGE: &str =
    r#"1 - avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[1m]))"#;
const MEMORY_TOTAL: &str = "node_memory_MemTotal_bytes";
const MEMORY_USAGE: &str = "node_memory_MemTotal_bytes - node_memory_MemAvailable_bytes";
const NETWORK_RX: &str = r#"sum by (instance, device) (rate(node_network_receive_bytes_total{device!~"lo|veth.*"}[1m]))"#;
const NETWORK_TX: &str = r#"sum by (instance, device) (rate(node_network_transmit_bytes_total{device!~"lo|veth.*"}[1m]))"#;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Matrix(Vec<MatrixSeries>),
    Vector(Vec<VectorSample>),
    Scalar(IgnoredAny),
    String(IgnoredAny),
}

#[derive(Debug, Clone, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    values: Vec<(f64, String)>,
}

#[derive(Debug, Clone, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

/// Prometheus client with a bounded request timeout
pub struct PrometheusClient {
    http: Client,
    base_url: String,
    window: Duration,
    step: Duration,
}

impl PrometheusClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        window: Duration,
        step: Duration,
    ) -> Result<Self, AgentError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            window,
            step,
        })
    }

    async fn query(&self, path: &str, params: &[(&str, String)]) -> Result<QueryData, SourceError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_error)?;

        // Prometheus reports bad queries as 4xx with a JSON error body
        if !status.is_success() && !body.trim_start().starts_with('{') {
            return Err(SourceError::Query(format!("{} returned {}", url, status)));
        }

        parse_response(&body)
    }

    async fn instant(&self, query: &str) -> Result<Vec<VectorSample>, SourceError> {
        match self
            .query("/api/v1/query", &[("query", query.to_string())])
            .await?
        {
            QueryData::Vector(samples) => Ok(samples),
            other => Err(unexpected_result("vector", &other)),
        }
    }

    async fn range(&self, query: &str) -> Result<Vec<MatrixSeries>, SourceError> {
        let end = unix_now();
        let start = end - self.window.as_secs_f64();

        let params = [
            ("query", query.to_string()),
            ("start", format!("{:.3}", start)),
            ("end", format!("{:.3}", end)),
            ("step", format!("{}s", self.step.as_secs().max(1))),
        ];

        match self.query("/api/v1/query_range", &params).await? {
            QueryData::Matrix(series) => Ok(series),
            other => Err(unexpected_result("matrix", &other)),
        }
    }
}

#[async_trait]
impl PrometheusSource for PrometheusClient {
    async fn is_ready(&self) -> bool {
        let url = format!("{}/-/ready", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Prometheus readiness probe failed: {}", e);
                false
            }
        }
    }

    async fn cpu_usages(&self) -> Result<Vec<InstanceMetric<CpuMetric>>, SourceError> {
        let (totals, usages) = tokio::try_join!(self.instant(CPU_TOTAL), self.range(CPU_USAGE))?;
        Ok(combine_usages(&totals, &usages, |total, usages| CpuMetric {
            total,
            usages,
        }))
    }

    async fn memory_usages(&self) -> Result<Vec<InstanceMetric<MemoryMetric>>, SourceError> {
        let (totals, usages) =
            tokio::try_join!(self.instant(MEMORY_TOTAL), self.range(MEMORY_USAGE))?;
        Ok(combine_usages(&totals, &usages, |total, usages| {
            MemoryMetric { total, usages }
        }))
    }

    async fn network_usages(&self) -> Result<Vec<InstanceMetric<NetworkMetric>>, SourceError> {
        let (rx, tx) = tokio::try_join!(self.range(NETWORK_RX), self.range(NETWORK_TX))?;
        Ok(combine_network(&rx, &tx))
    }
}

fn classify_error(e: reqwest::Error) -> SourceError {
    if e.is_connect() || e.is_timeout() {
        SourceError::Unreachable(e.to_string())
    } else {
        SourceError::Query(e.to_string())
    }
}

fn unexpected_result(expected: &str, got: &QueryData) -> SourceError {
    let got = match got {
        QueryData::Matrix(_) => "matrix",
        QueryData::Vector(_) => "vector",
        QueryData::Scalar(_) => "scalar",
        QueryData::String(_) => "string",
    };
    SourceError::Query(format!("expected {} result, got {}", expected, got))
}

fn parse_response(body: &str) -> Result<QueryData, SourceError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Query(format!("Malformed Prometheus response: {}", e)))?;

    if response.status != "success" {
        return Err(SourceError::Query(format!(
            "{}: {}",
            response.error_type.as_deref().unwrap_or("error"),
            response.error.as_deref().unwrap_or("unknown error")
        )));
    }

    response
        .data
        .ok_or_else(|| SourceError::Query("Prometheus response carries no data".to_string()))
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Points of a range series, without NaN or infinite samples
fn to_samples(values: &[(f64, String)]) -> Vec<Sample> {
    values
        .iter()
        .filter_map(|(timestamp, raw)| parse_value(raw).map(|v| (*timestamp, v)))
        .collect()
}

/// Pair instant totals with range usages by instance. Instances present in only one
/// of the two get a zero total or an empty usage series.
fn combine_usages<M>(
    totals: &[VectorSample],
    usages: &[MatrixSeries],
    build: impl Fn(i64, Vec<Sample>) -> M,
) -> Vec<InstanceMetric<M>> {
    let mut by_instance: BTreeMap<String, (i64, Vec<Sample>)> = BTreeMap::new();

    for sample in totals {
        let Some(instance) = sample.metric.get("instance") else {
            continue;
        };
        let total = parse_value(&sample.value.1).map(|v| v as i64).unwrap_or(0);
        by_instance.entry(instance.clone()).or_default().0 = total;
    }

    for series in usages {
        let Some(instance) = series.metric.get("instance") else {
            continue;
        };
        by_instance.entry(instance.clone()).or_default().1 = to_samples(&series.values);
    }

    by_instance
        .into_iter()
        .map(|(instance, (total, usages))| InstanceMetric {
            instance,
            metric: build(total, usages),
        })
        .collect()
}

/// Pick the busiest device per instance (highest latest receive rate) and pair its
/// receive and transmit series.
fn combine_network(rx: &[MatrixSeries], tx: &[MatrixSeries]) -> Vec<InstanceMetric<NetworkMetric>> {
    let mut busiest: BTreeMap<&str, (&str, f64, &MatrixSeries)> = BTreeMap::new();

    for series in rx {
        let (Some(instance), Some(device)) =
            (series.metric.get("instance"), series.metric.get("device"))
        else {
            continue;
        };
        let latest = series
            .values
            .last()
            .and_then(|(_, raw)| parse_value(raw))
            .unwrap_or(0.0);

        let replace = match busiest.get(instance.as_str()) {
            Some((current, rate, _)) => {
                latest > *rate || (latest == *rate && device.as_str() < *current)
            }
            None => true,
        };
        if replace {
            busiest.insert(instance.as_str(), (device.as_str(), latest, series));
        }
    }

    busiest
        .into_iter()
        .map(|(instance, (device, _, rx_series))| {
            let tx_bytes = tx
                .iter()
                .find(|s| {
                    s.metric.get("instance").map(String::as_str) == Some(instance)
                        && s.metric.get("device").map(String::as_str) == Some(device)
                })
                .map(|s| to_samples(&s.values))
                .unwrap_or_default();

            InstanceMetric {
                instance: instance.to_string(),
                metric: NetworkMetric {
                    device: device.to_string(),
                    rx_bytes: to_samples(&rx_series.values),
                    tx_bytes,
                },
            }
        })
        .collect()
}
