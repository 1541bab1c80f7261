//! Core configuration types.
//!
//! [`Config`] holds everything the library needs to run; the server binary
//! builds one from its YAML file and CLI overrides.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DELIVERY_TIMEOUT_SECS, DEFAULT_LOOKAHEAD, DEFAULT_NOTIFY_PERIOD_FRAMES,
    DEFAULT_QUEUE_DEPTH, ENCODER_BLOCK_SIZE, RECEIPT_RETENTION_SECS,
};

/// Configuration for the capture bridge.
///
/// Groups the knobs that control the push→pull adaptation: queue depth,
/// lookahead, delivery timeout, and progress notification cadence.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Maximum packets admitted to the capture queue before the delivery
    /// callback starts rejecting (backpressure).
    pub max_queue_depth: usize,

    /// Packets held back in the lookahead cache for trailing-silence
    /// inspection. One is sufficient for the known half-second artifact.
    pub lookahead: usize,

    /// Seconds to wait for the next delivery packet before the stream is
    /// declared dead. 120 by default; lean deployments use 30.
    pub delivery_timeout_secs: u64,

    /// Progress notification period in frames (0 disables notifications).
    pub notify_period_frames: u64,
}

impl CaptureConfig {
    /// Creates a new `CaptureConfig` with validated values.
    ///
    /// # Errors
    ///
    /// Returns an error if any value would cause runtime issues.
    pub fn new(
        max_queue_depth: usize,
        lookahead: usize,
        delivery_timeout_secs: u64,
        notify_period_frames: u64,
    ) -> Result<Self, String> {
        let config = Self {
            max_queue_depth,
            lookahead,
            delivery_timeout_secs,
            notify_period_frames,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be >= 1".to_string());
        }
        if self.delivery_timeout_secs == 0 {
            return Err("delivery_timeout_secs must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            lookahead: DEFAULT_LOOKAHEAD,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            notify_period_frames: DEFAULT_NOTIFY_PERIOD_FRAMES,
        }
    }
}

/// Configuration for the Tonebridge application.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Port for the HTTP server.
    pub port: u16,

    // Capture
    /// Capture bridge configuration.
    #[serde(default)]
    pub capture: CaptureConfig,

    // Session
    /// Seconds a finished receipt is retained before eviction.
    pub receipt_retention_secs: u64,

    // Transcode
    /// Read block size for the encoder's stdout (bytes).
    pub encoder_block_size: usize,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        self.capture.validate()?;
        if self.encoder_block_size == 0 {
            return Err("encoder_block_size must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 39704,
            capture: CaptureConfig::default(),
            receipt_retention_secs: RECEIPT_RETENTION_SECS,
            encoder_block_size: ENCODER_BLOCK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_default_is_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn capture_config_rejects_zero_values() {
        assert!(CaptureConfig::new(0, 1, 120, 0).is_err());
        assert!(CaptureConfig::new(10, 1, 0, 0).is_err());
    }

    #[test]
    fn capture_config_allows_disabled_notifications() {
        assert!(CaptureConfig::new(10, 1, 30, 0).is_ok());
    }

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.port, 39704);
        assert_eq!(config.capture.max_queue_depth, 10);
        assert!(config.validate().is_ok());
    }
}
