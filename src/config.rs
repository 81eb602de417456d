//! Process configuration for the endpoint and the controller.
//!
//! Both configs have sensible defaults, can be loaded from a JSON file and
//! are overridden field-by-field by the binaries' command-line flags.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ENDPOINT_PORT: u16 = 10025;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Mock AOCS endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub apid: u16,
    pub source_id: u16,
    /// Simulation RNG seed; unset seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_ENDPOINT_PORT,
            apid: 100,
            source_id: 1,
            seed: None,
        }
    }
}

/// SCOE controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub aocs_host: String,
    pub aocs_port: u16,
    pub apid: u16,
    pub source_id: u16,
    /// Fixed redial period while disconnected.
    pub retry_period_ms: u64,
    /// Deadline for a verification report per telecommand.
    pub command_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            aocs_host: "localhost".to_owned(),
            aocs_port: DEFAULT_ENDPOINT_PORT,
            apid: 200,
            source_id: 2,
            retry_period_ms: 5000,
            command_timeout_ms: 5000,
        }
    }
}

/// Load a config from a JSON file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
