//! Device power reporting
//!
//! The Network Server learns the power source and battery level of a device
//! from DevStatusAns. The battery byte is interpreted as follows:
//! - 0: external power
//! - 1..=254: battery level, 1 being empty and 254 full
//! - 255: level could not be measured

use serde::{Deserialize, Serialize};

/// Power source of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// No status received, or level unknown
    #[default]
    Unknown,
    /// Externally powered
    External,
    /// Battery powered
    Battery,
}

/// Power state and battery percentage for a DevStatusAns battery byte
pub fn from_battery_level(level: u8) -> (PowerState, Option<f32>) {
    match level {
        0 => (PowerState::External, None),
        255 => (PowerState::Unknown, None),
        n => (PowerState::Battery, Some(f32::from(n - 1) / 253.0)),
    }
}
