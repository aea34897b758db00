//! Remote cluster name from the gateway settings file
//!
//! The control plane writes the settings file when the gateway joins or leaves a
//! broker. It is re-read on every call so a join shows up on the next cycle.

use super::ClusterMetadata;
use crate::error::SourceError;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
struct GatewaySettings {
    #[serde(default)]
    remote_cluster_name: Option<String>,
}

pub struct SettingsFileMetadata {
    path: PathBuf,
}

impl SettingsFileMetadata {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ClusterMetadata for SettingsFileMetadata {
    fn remote_cluster_name(&self) -> Result<Option<String>, SourceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SourceError::Query(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        let settings: GatewaySettings = serde_yaml::from_str(&raw)
            .map_err(|e| SourceError::Query(format!("{}: {}", self.path.display(), e)))?;

        Ok(settings
            .remote_cluster_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()))
    }
}
