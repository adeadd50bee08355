//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainsocket_core::policy::ReconnectConfig;
use chainsocket_core::transport::TransportConfig;

/// Errors loading a [`WsClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsClientConfig {
    /// Connect as soon as the client is constructed.
    #[serde(default = "bool_true")]
    pub automatic_open: bool,
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Backoff multiplier between reconnect attempts.
    #[serde(default = "default_reconnect_decay")]
    pub reconnect_decay: f64,
    /// Upper bound on the reconnect delay, in milliseconds.
    #[serde(default = "default_max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,
    /// Reconnect attempts before giving up; `0` = unlimited.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Largest accepted frame, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Connect attempts that take longer than this fail with a timeout
    /// (and are retried through the reconnect policy).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn bool_true() -> bool { true }
fn default_reconnect_interval_ms() -> u64 { 1_000 }
fn default_reconnect_decay() -> f64 { 1.5 }
fn default_max_reconnect_interval_ms() -> u64 { 30_000 }
fn default_max_frame_size() -> usize { 16 << 20 }
fn default_connect_timeout_ms() -> u64 { 10_000 }

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            automatic_open: true,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_decay: default_reconnect_decay(),
            max_reconnect_interval_ms: default_max_reconnect_interval_ms(),
            max_reconnect_attempts: 0,
            max_frame_size: default_max_frame_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl WsClientConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reconnect_decay.is_finite() || self.reconnect_decay < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "reconnect_decay must be a finite number >= 1.0, got {}",
                self.reconnect_decay
            )));
        }
        if self.max_reconnect_interval_ms < self.reconnect_interval_ms {
            return Err(ConfigError::Invalid(
                "max_reconnect_interval_ms must not be below reconnect_interval_ms".into(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid("max_frame_size must be positive".into()));
        }
        Ok(())
    }

    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            base_interval: Duration::from_millis(self.reconnect_interval_ms),
            decay: self.reconnect_decay,
            max_interval: Duration::from_millis(self.max_reconnect_interval_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_frame_size: self.max_frame_size,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = WsClientConfig::from_json_str("{}").unwrap();
        assert!(config.automatic_open);
        assert_eq!(config.reconnect_interval_ms, 1_000);
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.max_frame_size, WsClientConfig::default().max_frame_size);
    }

    #[test]
    fn overrides_are_applied() {
        let config = WsClientConfig::from_json_str(
            r#"{"automatic_open": false, "max_reconnect_attempts": 4, "reconnect_decay": 2.0}"#,
        )
        .unwrap();
        assert!(!config.automatic_open);
        let reconnect = config.reconnect();
        assert_eq!(reconnect.max_attempts, 4);
        assert_eq!(reconnect.decay, 2.0);
        assert_eq!(reconnect.base_interval, Duration::from_secs(1));
    }

    #[test]
    fn rejects_shrinking_decay() {
        let err = WsClientConfig::from_json_str(r#"{"reconnect_decay": 0.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_intervals() {
        let err = WsClientConfig::from_json_str(
            r#"{"reconnect_interval_ms": 5000, "max_reconnect_interval_ms": 100}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = WsClientConfig::from_json_file("/nonexistent/chainsocket.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
