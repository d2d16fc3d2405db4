//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffConfig;
use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Default broker address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:15555";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker address as `host:port`
    pub address: String,

    /// Interval between outbound heartbeats
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Default timeout for `invoke`
    #[serde(with = "duration_millis")]
    pub invoke_timeout: Duration,

    /// Timeout for establishing the TCP connection
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Reconnect automatically after an unexpected disconnect
    pub auto_reconnect: bool,

    /// Delay policy between reconnect attempts
    pub reconnect_backoff: BackoffConfig,

    /// Largest encoded message accepted in either direction
    pub max_frame_size: usize,
}

impl ClientConfig {
    /// Create a config for the given address with default settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Check every field is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_string()));
        }
        if !self.address.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "address '{}' is not in host:port form",
                self.address
            )));
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("invoke_timeout", self.invoke_timeout),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size {} exceeds the 32-bit frame length",
                self.max_frame_size
            )));
        }
        self.reconnect_backoff.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            invoke_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
            auto_reconnect: true,
            reconnect_backoff: BackoffConfig::default(),
            max_frame_size: bw_protocol::MAX_PAYLOAD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.invoke_timeout, Duration::from_secs(3));
        assert!(config.auto_reconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            address = "broker.local:7000"
            heartbeat_interval = 500

            [reconnect_backoff]
            policy = "fixed"
            initial = 3000
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.address, "broker.local:7000");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.invoke_timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect_backoff.policy, crate::config::BackoffPolicy::Fixed);
        assert_eq!(config.reconnect_backoff.initial, Duration::from_secs(3));
        assert_eq!(config.reconnect_backoff.max_attempts, Some(5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::new("");
        assert!(config.validate().is_err());

        config.address = "no-port".to_string();
        assert!(config.validate().is_err());

        config.address = "localhost:1".to_string();
        config.invoke_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("invoke_timeout")));

        config.invoke_timeout = Duration::from_secs(1);
        config.max_frame_size = 0;
        assert!(config.validate().is_err());
    }
}
