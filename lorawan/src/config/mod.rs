//! Network Server registry configuration
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration. Durations are integers: milliseconds in `[registry]`,
//! seconds in `[default_mac_settings]`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::device::{MacSettings, Val};
use crate::error::Result;

/// Registry configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// KEK label new session keys are wrapped with; empty stores plaintext envelopes
    pub device_kek_label: String,
    /// Storage and transaction options
    pub registry: RegistryConfig,
    /// MAC settings applied to fresh MAC states
    pub default_mac_settings: DefaultMacSettings,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse the TOML file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Transaction and pagination options
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Expiry of a record lock
    #[serde(deserialize_with = "millis")]
    pub lock_ttl: Duration,
    /// How long a transaction waits for a held lock
    #[serde(deserialize_with = "millis")]
    pub lock_wait: Duration,
    /// Attempts of a transaction body before a conflict is surfaced
    pub conflict_attempts: u32,
    /// Page size of list calls without a limit; 0 is unlimited
    pub pagination_default_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_wait: Duration::from_secs(5),
            conflict_attempts: 3,
            pagination_default_limit: 0,
        }
    }
}

/// Network-wide MAC settings defaults
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultMacSettings {
    /// ADR margin (dB)
    pub adr_margin: Option<f32>,
    /// Desired RX1 delay (s)
    pub desired_rx1_delay: Option<u32>,
    /// Class B confirmation timeout (s)
    pub class_b_timeout: Option<u64>,
    /// Class C confirmation timeout (s)
    pub class_c_timeout: Option<u64>,
    /// DevStatusReq time periodicity (s)
    pub status_time_periodicity: Option<u64>,
    /// DevStatusReq uplink count periodicity
    pub status_count_periodicity: Option<u32>,
    /// Desired maximum duty cycle exponent
    pub desired_max_duty_cycle: Option<u32>,
    /// Desired ADR ACK limit exponent
    pub desired_adr_ack_limit_exponent: Option<u32>,
    /// Desired ADR ACK delay exponent
    pub desired_adr_ack_delay_exponent: Option<u32>,
}

impl Default for DefaultMacSettings {
    fn default() -> Self {
        Self {
            adr_margin: Some(15.0),
            desired_rx1_delay: Some(5),
            class_b_timeout: Some(60),
            class_c_timeout: Some(300),
            status_time_periodicity: Some(24 * 60 * 60),
            status_count_periodicity: Some(200),
            desired_max_duty_cycle: None,
            desired_adr_ack_limit_exponent: None,
            desired_adr_ack_delay_exponent: None,
        }
    }
}

impl DefaultMacSettings {
    /// Defaults as device MAC settings
    pub fn mac_settings(&self) -> MacSettings {
        MacSettings {
            adr_margin: self.adr_margin,
            desired_rx1_delay: self.desired_rx1_delay.and_then(Val::some),
            class_b_timeout: self.class_b_timeout.map(Duration::from_secs),
            class_c_timeout: self.class_c_timeout.map(Duration::from_secs),
            status_time_periodicity: self.status_time_periodicity.map(Duration::from_secs),
            status_count_periodicity: self.status_count_periodicity.and_then(Val::some),
            desired_max_duty_cycle: self.desired_max_duty_cycle.and_then(Val::some),
            desired_adr_ack_limit_exponent: self.desired_adr_ack_limit_exponent.and_then(Val::some),
            desired_adr_ack_delay_exponent: self.desired_adr_ack_delay_exponent.and_then(Val::some),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_toml_str(
            r#"
            device_kek_label = "ns-dev"

            [registry]
            lock_ttl = 2500
            conflict_attempts = 5

            [default_mac_settings]
            desired_rx1_delay = 3
            class_c_timeout = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.device_kek_label, "ns-dev");
        assert_eq!(config.registry.lock_ttl, Duration::from_millis(2500));
        assert_eq!(config.registry.lock_wait, Duration::from_secs(5));
        assert_eq!(config.registry.conflict_attempts, 5);

        let settings = config.default_mac_settings.mac_settings();
        assert_eq!(settings.desired_rx1_delay, Val::some(3));
        assert_eq!(settings.class_c_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.adr_margin, Some(15.0));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            Config::from_toml_str("registry = 1"),
            Err(crate::error::Error::Config(_))
        ));
    }
}
