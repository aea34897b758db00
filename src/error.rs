use meshgate_agent::AgentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshgateError {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Kubernetes error: {0}")]
    KubernetesError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file {path}: {source}")]
    InvalidConfigFile {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cluster cache did not sync within {0} seconds")]
    SyncTimeout(u64),
}

pub type Result<T> = std::result::Result<T, MeshgateError>;
