use crate::{MeshgateError, Result};
use meshgate_agent::AgentConfig;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Command-line values that take precedence over the configuration file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub poll_interval_secs: Option<u64>,
    pub prometheus_url: Option<String>,
}

/// Load the agent configuration from an optional YAML file, apply overrides and validate
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<AgentConfig> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let raw = fs::read_to_string(path).map_err(|e| {
                MeshgateError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            parse(&raw, path)?
        }
        None => {
            debug!("No configuration file given, using defaults");
            AgentConfig::default()
        }
    };

    if let Some(interval) = overrides.poll_interval_secs {
        config.poll_interval_secs = interval;
    }
    if let Some(url) = &overrides.prometheus_url {
        config.prometheus_url = url.clone();
    }

    config.validate()?;
    Ok(config)
}

fn parse(raw: &str, path: &Path) -> Result<AgentConfig> {
    if raw.trim().is_empty() {
        return Ok(AgentConfig::default());
    }

    serde_yaml::from_str(raw).map_err(|source| MeshgateError::InvalidConfigFile {
        path: path.display().to_string(),
        source,
    })
}
