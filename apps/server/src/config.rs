//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use tonebridge_core::constants::SAMPLE_RATE;
use tonebridge_core::CaptureConfig;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `TONEBRIDGE_PORT`
    pub port: u16,

    /// Path to the backend credentials JSON file.
    /// Override: `TONEBRIDGE_CREDENTIALS`
    pub credentials: Option<PathBuf>,

    /// Seconds to wait for delivery packets before a stream is declared
    /// dead. 120 by default; lean deployments use 30.
    /// Override: `TONEBRIDGE_DELIVERY_TIMEOUT`
    pub delivery_timeout_secs: u64,

    /// Progress notification period in seconds of audio (0 disables).
    pub notify_period_secs: u64,

    /// Hours a finished receipt is retained before eviction.
    pub receipt_retention_hours: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 39704,
            credentials: None,
            delivery_timeout_secs: 120,
            notify_period_secs: 60,
            receipt_retention_hours: 12,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TONEBRIDGE_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("TONEBRIDGE_CREDENTIALS") {
            if !val.is_empty() {
                self.credentials = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("TONEBRIDGE_DELIVERY_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.delivery_timeout_secs = secs;
            }
        }
    }

    /// Converts to tonebridge-core's Config type.
    pub fn to_core_config(&self) -> tonebridge_core::Config {
        tonebridge_core::Config {
            port: self.port,
            capture: CaptureConfig {
                delivery_timeout_secs: self.delivery_timeout_secs,
                notify_period_frames: self.notify_period_secs * u64::from(SAMPLE_RATE),
                ..CaptureConfig::default()
            },
            receipt_retention_secs: self.receipt_retention_hours * 3600,
            ..tonebridge_core::Config::default()
        }
    }
}
