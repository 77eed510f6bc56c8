//! End device record
//!
//! [`EndDevice`] is the aggregate root the registry stores. Field names match
//! the dotted paths used in field masks, e.g. `mac_state.current_parameters`.
//! Optional scalars whose zero value is meaningful are wrapped in [`Val`]
//! (`{"value": ...}`) so that presence and zero stay distinct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lorawan::mac::MacVersion;
use crate::lorawan::phy::PhyVersion;
use crate::mask;
use crate::path::FieldPath;

/// Identifiers and byte values
pub mod ids;

/// Key envelopes and key bundles
pub mod keys;

/// MAC settings and profiles
pub mod mac_settings;

/// MAC state
pub mod mac_state;

/// Power reporting
pub mod power;

/// Relay parameters
pub mod relay;

/// Network sessions
pub mod session;

pub use ids::{AesKey, DevAddr, EndDeviceIdentifiers, Eui64};
pub use keys::{KeyEnvelope, RootKeys, SessionKeys};
pub use mac_settings::{MacSettings, MacSettingsProfile};
pub use mac_state::{DeviceClass, MacParameters, MacState};
pub use power::PowerState;
pub use session::Session;

/// Optional scalar wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Val<T> {
    /// Wrapped value
    pub value: T,
}

impl<T> Val<T> {
    /// `Some(Val { value })`
    pub fn some(value: T) -> Option<Self> {
        Some(Self { value })
    }
}

/// End device record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndDevice {
    /// Identifiers
    pub ids: EndDeviceIdentifiers,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time
    pub updated_at: Option<DateTime<Utc>>,
    /// Version identifiers
    pub version_ids: Option<ids::EndDeviceVersionIdentifiers>,
    /// Frequency plan identifier
    pub frequency_plan_id: String,
    /// LoRaWAN MAC version
    pub lorawan_version: Option<MacVersion>,
    /// LoRaWAN regional parameters version
    pub lorawan_phy_version: Option<PhyVersion>,
    /// Whether the device activates over the air
    pub supports_join: bool,
    /// Whether the device is a multicast group
    pub multicast: bool,
    /// Whether the device supports class B
    pub supports_class_b: bool,
    /// Whether the device supports class C
    pub supports_class_c: bool,
    /// OTAA root keys
    pub root_keys: Option<RootKeys>,
    /// Active session
    pub session: Option<Session>,
    /// Session being established
    pub pending_session: Option<Session>,
    /// Active MAC state
    pub mac_state: Option<MacState>,
    /// MAC state being negotiated
    pub pending_mac_state: Option<MacState>,
    /// Explicit MAC settings
    pub mac_settings: Option<MacSettings>,
    /// Referenced MAC settings profile
    pub mac_settings_profile_ids: Option<ids::MacSettingsProfileIdentifiers>,
    /// Last reported battery level, 0.0 to 1.0
    pub battery_percentage: Option<Val<f32>>,
    /// Last reported demodulation margin (dB)
    pub downlink_margin: i32,
    /// Last DevStatusAns reception
    pub last_dev_status_received_at: Option<DateTime<Utc>>,
    /// Power source
    pub power_state: PowerState,
}

impl EndDevice {
    /// Empty record addressed by `ids`
    pub fn new(ids: EndDeviceIdentifiers) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    /// Serialized value tree of the record
    pub fn to_value(&self) -> Result<serde_json::Value> {
        mask::to_value(self)
    }

    /// Whether the field at `path` is zero
    pub fn field_is_zero(&self, path: &FieldPath) -> Result<bool> {
        Ok(mask::field_is_zero(&self.to_value()?, path))
    }

    /// Effective MAC version: the MAC state's, else the device's
    pub fn mac_version(&self) -> Option<MacVersion> {
        self.mac_state
            .as_ref()
            .and_then(|st| st.lorawan_version)
            .or(self.lorawan_version)
    }
}
