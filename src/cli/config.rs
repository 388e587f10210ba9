use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::protocol::codec::{parse_hex_frame, RawFrameCodec};

/// Courier configuration, usually loaded from a TOML file
///
/// ```toml
/// port_name = "/dev/ttyUSB0"
/// baud_rate = 9600
/// poll_interval_ms = 100
/// timeout_ms = 500
/// command = "02 08 10 7F 10 00 03"
/// max_response_size = 11
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Serial port the slave is attached to
    #[serde(default)]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Delay between the end of one cycle and the start of the next
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long to wait for a response
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Command frame sent every cycle, as hex
    #[serde(default)]
    pub command: String,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
    #[serde(default = "default_min_response_size")]
    pub min_response_size: usize,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_max_response_size() -> usize {
    64
}

fn default_min_response_size() -> usize {
    1
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: default_baud_rate(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            command: String::new(),
            max_response_size: default_max_response_size(),
            min_response_size: default_min_response_size(),
        }
    }
}

impl CourierConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid courier configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check everything that would otherwise fail later inside the loop
    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(anyhow!("port_name is required"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than zero"));
        }
        if self.max_response_size == 0 {
            return Err(anyhow!("max_response_size must be greater than zero"));
        }
        if self.min_response_size > self.max_response_size {
            return Err(anyhow!(
                "min_response_size ({}) exceeds max_response_size ({})",
                self.min_response_size,
                self.max_response_size
            ));
        }
        parse_hex_frame(&self.command).context("Invalid command frame")?;
        Ok(())
    }

    pub fn build_codec(&self) -> Result<RawFrameCodec> {
        let command = parse_hex_frame(&self.command).context("Invalid command frame")?;
        Ok(RawFrameCodec::new(command, self.max_response_size)
            .with_min_response_size(self.min_response_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = CourierConfig::from_toml(
            r#"
            port_name = "/dev/ttyUSB0"
            command = "02 08 10"
            "#,
        )
        .unwrap();

        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.max_response_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CourierConfig {
            port_name: "COM3".to_string(),
            command: "02".to_string(),
            max_response_size: 11,
            ..Default::default()
        };

        let text = config.to_toml().unwrap();
        assert_eq!(CourierConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = CourierConfig {
            port_name: "COM3".to_string(),
            command: "02".to_string(),
            ..Default::default()
        };
        assert!(base.validate().is_ok());

        let zero_interval = CourierConfig {
            poll_interval_ms: 0,
            ..base.clone()
        };
        assert!(zero_interval.validate().is_err());

        let no_port = CourierConfig {
            port_name: String::new(),
            ..base.clone()
        };
        assert!(no_port.validate().is_err());

        let bad_command = CourierConfig {
            command: "xyz".to_string(),
            ..base.clone()
        };
        assert!(bad_command.validate().is_err());

        let sizes = CourierConfig {
            min_response_size: 10,
            max_response_size: 4,
            ..base
        };
        assert!(sizes.validate().is_err());
    }

    #[test]
    fn test_build_codec() {
        let config = CourierConfig {
            port_name: "COM3".to_string(),
            command: "0x02 0x08".to_string(),
            max_response_size: 11,
            ..Default::default()
        };
        let codec = config.build_codec().unwrap();
        assert_eq!(codec.command(), &[0x02, 0x08]);
    }
}
