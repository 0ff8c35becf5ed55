#![forbid(unsafe_code)]

// Simulation configuration: defaults, JSON file, then command-line overrides

use crate::signaling::connection::websocket_url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How virtual students get their display name and class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Name and class drawn at random from the catalog
    #[default]
    Random,
    /// Fixed roster, client i gets entry i (wrapping)
    Roster,
}

/// Full simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub server_address: String,
    pub client_count: usize,
    pub stagger_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_settle_ms: u64,
    pub join_wait_ms: u64,
    pub keystroke_min_ms: u64,
    pub keystroke_max_ms: u64,
    pub idle_ms: u64,
    pub lifecycle_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_clients: Option<usize>,
    pub identity_mode: IdentityMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            server_address: "http://127.0.0.1:8080".to_string(),
            client_count: 15,
            stagger_interval_ms: 300,
            connect_timeout_ms: 5000,
            handshake_settle_ms: 500,
            join_wait_ms: 500,
            keystroke_min_ms: 50,
            keystroke_max_ms: 150,
            idle_ms: 5000,
            lifecycle_timeout_ms: 120_000,
            max_concurrent_clients: None,
            identity_mode: IdentityMode::Random,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Defaults overlaid with the JSON file at `path`, if any
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        websocket_url(&self.server_address)
            .map_err(|e| ConfigError::Invalid(format!("serverAddress: {e}")))?;

        if self.keystroke_min_ms > self.keystroke_max_ms {
            return Err(ConfigError::Invalid(format!(
                "keystrokeMinMs ({}) exceeds keystrokeMaxMs ({})",
                self.keystroke_min_ms, self.keystroke_max_ms
            )));
        }
        if self.lifecycle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lifecycleTimeoutMs must be positive".to_string(),
            ));
        }
        if self.max_concurrent_clients == Some(0) {
            return Err(ConfigError::Invalid(
                "maxConcurrentClients must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stagger_interval(&self) -> Duration {
        Duration::from_millis(self.stagger_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }
}
