//! Watch supervision: pausable polling loops and the collectors they drive

pub mod multi_cluster;
pub mod node;
pub mod rate_limit;
pub mod supervisor;

use crate::error::Result;
use async_trait::async_trait;
use meshgate_common::MetricKind;

pub use multi_cluster::MultiClusterMetricCollector;
pub use node::NodeMetricCollector;
pub use rate_limit::RateLimiter;
pub use supervisor::WatchSupervisor;

/// Target-specific work executed once per polling cycle
///
/// Preconditions that are not met and transient source outages end the cycle with
/// `Ok(())`. An `Err` is logged by the supervisor and the loop carries on.
#[async_trait]
pub trait Collector: Send + Sync {
    fn target(&self) -> MetricKind;

    async fn collect(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fakes;
