// src/settings.rs
//
// Dongle configuration: which ports to open and how to configure them.
// Loadable from TOML; every field except `port_a` has a default.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};
use std::path::Path;
use std::time::Duration;

use crate::error::{DongleError, Result};

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for SpParity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => SpParity::None,
            Parity::Odd => SpParity::Odd,
            Parity::Even => SpParity::Even,
        }
    }
}

/// Serial line settings shared by both links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Upper bound on how long a blocked read takes to notice `close()`
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    50
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl LinkSettings {
    /// Data bits as the serialport crate's type. Anything unrecognised is eight.
    pub fn serial_data_bits(&self) -> DataBits {
        match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    pub fn serial_stop_bits(&self) -> StopBits {
        match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Short form like `115200 8N1` for log lines.
    pub fn describe(&self) -> String {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        format!("{} {}{}{}", self.baud_rate, self.data_bits, parity, self.stop_bits)
    }
}

/// Top-level dongle configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DongleConfig {
    /// First serial link (e.g. "COM15", "/dev/ttyACM0")
    pub port_a: String,
    /// Optional second serial link
    #[serde(default)]
    pub port_b: Option<String>,
    /// Open the links and start decoding as soon as the dispatcher is built
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub link: LinkSettings,
}

impl DongleConfig {
    pub fn new(port_a: impl Into<String>, port_b: Option<String>) -> Self {
        DongleConfig {
            port_a: port_a.into(),
            port_b,
            auto_start: false,
            link: LinkSettings::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DongleConfig = toml::from_str(content)
            .map_err(|e| DongleError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DongleError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DongleError::config(format!("Failed to serialise config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_a.trim().is_empty() {
            return Err(DongleError::config("port_a must name a serial device"));
        }
        if let Some(port_b) = &self.port_b {
            if port_b.trim().is_empty() {
                return Err(DongleError::config("port_b must not be empty when set"));
            }
            if port_b == &self.port_a {
                return Err(DongleError::config("port_a and port_b must be different devices"));
            }
        }
        if self.link.baud_rate == 0 {
            return Err(DongleError::config("baud_rate must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = DongleConfig::from_toml_str(r#"port_a = "COM15""#).unwrap();
        assert_eq!(config.port_a, "COM15");
        assert_eq!(config.port_b, None);
        assert_eq!(config.link, LinkSettings::default());
        assert!(!config.auto_start);
        assert_eq!(config.link.describe(), "115200 8N1");
    }

    #[test]
    fn test_full_config() {
        let config = DongleConfig::from_toml_str(
            r#"
            port_a = "/dev/ttyACM0"
            port_b = "/dev/ttyACM1"
            auto_start = true

            [link]
            baud_rate = 921600
            parity = "even"
            stop_bits = 2
            read_timeout_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.port_b.as_deref(), Some("/dev/ttyACM1"));
        assert!(config.auto_start);
        assert_eq!(config.link.baud_rate, 921_600);
        assert_eq!(config.link.parity, Parity::Even);
        assert!(matches!(config.link.serial_stop_bits(), StopBits::Two));
        assert!(matches!(config.link.serial_data_bits(), DataBits::Eight));
        assert_eq!(config.link.read_timeout(), Duration::from_millis(20));
    }

    #[test]
    fn test_same_port_twice_rejected() {
        let err = DongleConfig::from_toml_str(
            r#"
            port_a = "COM3"
            port_b = "COM3"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DongleError::Config { .. }));
    }

    #[test]
    fn test_missing_port_rejected() {
        assert!(DongleConfig::from_toml_str("auto_start = true").is_err());
        assert!(DongleConfig::from_toml_str(r#"port_a = "  ""#).is_err());
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let mut config = DongleConfig::new("COM15", Some("COM16".to_string()));
        config.link.parity = Parity::Odd;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = DongleConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parity_conversion() {
        assert!(matches!(SpParity::from(Parity::None), SpParity::None));
        assert!(matches!(SpParity::from(Parity::Odd), SpParity::Odd));
        assert!(matches!(SpParity::from(Parity::Even), SpParity::Even));
    }

    #[test]
    fn test_zero_timeout_clamped() {
        let settings = LinkSettings {
            read_timeout_ms: 0,
            ..LinkSettings::default()
        };
        assert_eq!(settings.read_timeout(), Duration::from_millis(1));
    }
}
