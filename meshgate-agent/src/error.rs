use meshgate_common::{MetricKind, ModelError};
use thiserror::Error;

/// Failures reported by the external data sources the collectors read
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The source could not be contacted at all; retried on the next cycle
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    /// A file or object the source needs does not exist (yet)
    #[error("Source data missing: {0}")]
    Missing(String),

    #[error("Source query failed: {0}")]
    Query(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("No watch registered for target {0}")]
    UnknownTarget(MetricKind),

    #[error("Watch already registered for target {0}")]
    DuplicateTarget(MetricKind),

    #[error("Event channel full, event for {0} dropped")]
    NotifierFull(MetricKind),

    #[error("Event channel closed")]
    NotifierClosed,

    #[error("Kubernetes error: {0}")]
    Kubernetes(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
