//! MAC settings and MAC settings profiles

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::MacSettingsProfileIdentifiers;
use super::relay::{Empty, RelayParameters};
use super::Val;

/// Explicit MAC layer overrides of a device
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacSettings {
    /// Class B downlink confirmation timeout
    pub class_b_timeout: Option<Duration>,
    /// Ping slot periodicity
    pub ping_slot_periodicity: Option<Val<u32>>,
    /// Ping slot data rate index
    pub ping_slot_data_rate_index: Option<Val<u32>>,
    /// Ping slot frequency (Hz)
    pub ping_slot_frequency: Option<Val<u64>>,
    /// Beacon frequency (Hz)
    pub beacon_frequency: Option<Val<u64>>,
    /// Class C downlink confirmation timeout
    pub class_c_timeout: Option<Duration>,
    /// RX1 delay (s)
    pub rx1_delay: Option<Val<u32>>,
    /// RX1 data rate offset
    pub rx1_data_rate_offset: Option<Val<u32>>,
    /// RX2 data rate index
    pub rx2_data_rate_index: Option<Val<u32>>,
    /// RX2 frequency (Hz)
    pub rx2_frequency: Option<Val<u64>>,
    /// Frequencies the device is factory-configured to use
    pub factory_preset_frequencies: Vec<u64>,
    /// Maximum duty cycle exponent
    pub max_duty_cycle: Option<Val<u32>>,
    /// Whether the device supports 32-bit frame counters
    pub supports_32_bit_f_cnt: Option<Val<bool>>,
    /// Legacy ADR toggle
    pub use_adr: Option<Val<bool>>,
    /// Legacy ADR margin (dB)
    pub adr_margin: Option<f32>,
    /// Whether the device resets frame counters
    pub resets_f_cnt: Option<Val<bool>>,
    /// DevStatusReq time periodicity
    pub status_time_periodicity: Option<Duration>,
    /// DevStatusReq uplink count periodicity
    pub status_count_periodicity: Option<Val<u32>>,
    /// Desired RX1 delay (s)
    pub desired_rx1_delay: Option<Val<u32>>,
    /// Desired RX1 data rate offset
    pub desired_rx1_data_rate_offset: Option<Val<u32>>,
    /// Desired RX2 data rate index
    pub desired_rx2_data_rate_index: Option<Val<u32>>,
    /// Desired RX2 frequency (Hz)
    pub desired_rx2_frequency: Option<Val<u64>>,
    /// Desired maximum duty cycle exponent
    pub desired_max_duty_cycle: Option<Val<u32>>,
    /// Desired ADR ACK limit exponent
    pub desired_adr_ack_limit_exponent: Option<Val<u32>>,
    /// Desired ADR ACK delay exponent
    pub desired_adr_ack_delay_exponent: Option<Val<u32>>,
    /// Desired ping slot data rate index
    pub desired_ping_slot_data_rate_index: Option<Val<u32>>,
    /// Desired ping slot frequency (Hz)
    pub desired_ping_slot_frequency: Option<Val<u64>>,
    /// Desired beacon frequency (Hz)
    pub desired_beacon_frequency: Option<Val<u64>>,
    /// Desired maximum EIRP (dBm)
    pub desired_max_eirp: Option<Val<f32>>,
    /// Minimum interval between class B/C downlinks
    pub class_b_c_downlink_interval: Option<Duration>,
    /// Uplink dwell time restriction
    pub uplink_dwell_time: Option<Val<bool>>,
    /// Downlink dwell time restriction
    pub downlink_dwell_time: Option<Val<bool>>,
    /// ADR settings
    pub adr: Option<AdrSettings>,
    /// Whether the Network Server schedules downlinks
    pub schedule_downlinks: Option<Val<bool>>,
    /// Relay parameters in effect
    pub relay: Option<RelayParameters>,
    /// Relay parameters to negotiate
    pub desired_relay: Option<RelayParameters>,
}

/// ADR settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdrSettings {
    /// ADR mode; at most one member is populated
    pub mode: Option<AdrMode>,
}

/// ADR mode
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdrMode {
    /// Fixed data rate, TX power and transmissions
    #[serde(rename = "static")]
    pub static_mode: Option<StaticAdr>,
    /// Network-driven ADR
    pub dynamic: Option<DynamicAdr>,
    /// ADR disabled
    pub disabled: Option<Empty>,
}

/// Static ADR parameters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticAdr {
    /// Data rate index
    pub data_rate_index: u32,
    /// TX power index
    pub tx_power_index: u32,
    /// Number of transmissions
    pub nb_trans: u32,
}

/// Dynamic ADR parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicAdr {
    /// ADR margin (dB)
    pub margin: Option<f32>,
    /// Maximum data rate index
    pub max_data_rate_index: Option<Val<u32>>,
    /// Minimum data rate index
    pub min_data_rate_index: Option<Val<u32>>,
    /// Maximum TX power index
    pub max_tx_power_index: Option<u32>,
    /// Minimum TX power index
    pub min_tx_power_index: Option<u32>,
    /// Maximum number of transmissions
    pub max_nb_trans: Option<u32>,
    /// Minimum number of transmissions
    pub min_nb_trans: Option<u32>,
    /// Channel steering
    pub channel_steering: Option<ChannelSteering>,
    /// Per data rate overrides
    pub overrides: Option<AdrOverrides>,
}

/// Channel steering settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSteering {
    /// Steering mode
    pub mode: Option<ChannelSteeringMode>,
}

/// Channel steering mode
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSteeringMode {
    /// Steer towards LoRa narrow channels
    pub lora_narrow: Option<Empty>,
    /// Steering disabled
    pub disabled: Option<Empty>,
}

/// Transmission bounds for one data rate
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdrOverride {
    /// Minimum number of transmissions
    pub min_nb_trans: Option<u32>,
    /// Maximum number of transmissions
    pub max_nb_trans: Option<u32>,
}

/// Number of data rate indexes with ADR overrides
pub const ADR_OVERRIDE_COUNT: usize = 16;

/// Per data rate ADR overrides, serialized as `data_rate_0` to `data_rate_15`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdrOverrides {
    by_index: [Option<AdrOverride>; ADR_OVERRIDE_COUNT],
}

impl AdrOverrides {
    /// Override for data rate `index`
    pub fn get(&self, index: usize) -> Option<&AdrOverride> {
        self.by_index.get(index)?.as_ref()
    }

    /// Set the override for data rate `index`
    pub fn set(&mut self, index: usize, value: AdrOverride) {
        if let Some(slot) = self.by_index.get_mut(index) {
            *slot = Some(value);
        }
    }
}

impl Serialize for AdrOverrides {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<String, &AdrOverride> = self
            .by_index
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (format!("data_rate_{}", i), o)))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AdrOverrides {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Option<AdrOverride>>::deserialize(deserializer)?;
        let mut out = Self::default();
        for (key, value) in map {
            let index = key
                .strip_prefix("data_rate_")
                .and_then(|i| i.parse::<usize>().ok())
                .filter(|i| *i < ADR_OVERRIDE_COUNT)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown override `{}`", key)))?;
            out.by_index[index] = value;
        }
        Ok(out)
    }
}

/// Application-scoped bundle of MAC settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacSettingsProfile {
    /// Profile identifiers
    pub ids: MacSettingsProfileIdentifiers,
    /// Settings applied to referencing devices
    pub mac_settings: Option<MacSettings>,
}

impl MacSettings {
    /// Dynamic ADR parameters, if dynamic mode is selected
    pub fn dynamic_adr(&self) -> Option<&DynamicAdr> {
        self.adr.as_ref()?.mode.as_ref()?.dynamic.as_ref()
    }

    /// Static ADR parameters, if static mode is selected
    pub fn static_adr(&self) -> Option<&StaticAdr> {
        self.adr.as_ref()?.mode.as_ref()?.static_mode.as_ref()
    }
}
