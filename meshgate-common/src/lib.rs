//! Metric model shared between the meshgate agent and its consumers
//!
//! This crate defines the records the agent caches and publishes:
//! - Fixed-capacity time series (`RingBuffer`) with FIFO eviction
//! - Per-node CPU, memory and network snapshots
//! - Per-endpoint multi-cluster network series
//!
//! Every record converts to and from a JSON field mapping through `FieldMapping`.
//! Construction rejects unknown fields and wrong-typed values with `ModelError::Validation`.

pub mod error;
pub mod model;
pub mod ring;

pub use error::ModelError;
pub use model::{
    CpuMetric, EndpointNetworkMetric, FieldMapping, MemoryMetric, MetricKind,
    MultiClusterMetric, NetworkMetric, NodeMetric, Sample,
};
pub use ring::{RingBuffer, ENDPOINT_SERIES_CAPACITY};
