//! Negotiated MAC state
//!
//! This module holds the MAC layer state the Network Server keeps per device:
//! - current and desired MAC parameters
//! - pending MAC requests and queued responses
//! - bounded uplink/downlink history
//! - the join request/accept being negotiated (pending MAC state only)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::DevAddr;
use super::keys::SessionKeys;
use super::relay::RelayParameters;
use super::session::ApplicationDownlink;
use super::Val;
use crate::lorawan::mac::MacVersion;

/// Capacity of the recent uplink/downlink ring buffers
pub const RECENT_CAPACITY: usize = 20;

/// LoRaWAN device class
///
/// Serialized as its numeric code so that class A is the zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    /// Class A: Uplink followed by two receive windows
    #[default]
    A,
    /// Class B: Scheduled receive slots (beaconing)
    B,
    /// Class C: Continuously listening except when transmitting
    C,
}

impl Serialize for DeviceClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match self {
            DeviceClass::A => 0,
            DeviceClass::B => 1,
            DeviceClass::C => 2,
        })
    }
}

impl<'de> Deserialize<'de> for DeviceClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<u8>::deserialize(deserializer)? {
            None | Some(0) => Ok(DeviceClass::A),
            Some(1) => Ok(DeviceClass::B),
            Some(2) => Ok(DeviceClass::C),
            Some(n) => Err(serde::de::Error::custom(format!("invalid device class {}", n))),
        }
    }
}

/// MAC parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacParameters {
    /// Maximum EIRP (dBm)
    pub max_eirp: f32,
    /// ADR data rate index
    pub adr_data_rate_index: u32,
    /// ADR TX power index
    pub adr_tx_power_index: u32,
    /// ADR number of transmissions
    pub adr_nb_trans: u32,
    /// ADR ACK limit exponent
    pub adr_ack_limit_exponent: Option<Val<u32>>,
    /// ADR ACK delay exponent
    pub adr_ack_delay_exponent: Option<Val<u32>>,
    /// RX1 data rate offset
    pub rx1_data_rate_offset: u32,
    /// RX1 delay (s)
    pub rx1_delay: u32,
    /// RX2 data rate index
    pub rx2_data_rate_index: u32,
    /// RX2 frequency (Hz)
    pub rx2_frequency: u64,
    /// Aggregated duty cycle exponent
    pub max_duty_cycle: u32,
    /// Rejoin time periodicity exponent
    pub rejoin_time_periodicity: u32,
    /// Rejoin count periodicity exponent
    pub rejoin_count_periodicity: u32,
    /// Ping slot frequency (Hz)
    pub ping_slot_frequency: u64,
    /// Ping slot data rate index
    pub ping_slot_data_rate_index_value: Option<Val<u32>>,
    /// Beacon frequency (Hz)
    pub beacon_frequency: u64,
    /// Configured channels
    pub channels: Vec<MacChannel>,
    /// Uplink dwell time restriction
    pub uplink_dwell_time: Option<Val<bool>>,
    /// Downlink dwell time restriction
    pub downlink_dwell_time: Option<Val<bool>>,
    /// Relay parameters
    pub relay: Option<RelayParameters>,
}

/// Names of every MAC parameter field
pub const MAC_PARAMETER_FIELDS: &[&str] = &[
    "adr_ack_delay_exponent.value",
    "adr_ack_limit_exponent.value",
    "adr_data_rate_index",
    "adr_nb_trans",
    "adr_tx_power_index",
    "beacon_frequency",
    "channels",
    "downlink_dwell_time.value",
    "max_duty_cycle",
    "max_eirp",
    "ping_slot_data_rate_index_value.value",
    "ping_slot_frequency",
    "rejoin_count_periodicity",
    "rejoin_time_periodicity",
    "relay",
    "rx1_data_rate_offset",
    "rx1_delay",
    "rx2_data_rate_index",
    "rx2_frequency",
    "uplink_dwell_time.value",
];

/// MAC channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacChannel {
    /// Uplink frequency (Hz)
    pub uplink_frequency: u64,
    /// Downlink frequency (Hz)
    pub downlink_frequency: u64,
    /// Minimum data rate index
    pub min_data_rate_index: u32,
    /// Maximum data rate index
    pub max_data_rate_index: u32,
    /// Whether uplinks are enabled
    pub enable_uplink: bool,
}

/// MAC command with raw payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacCommand {
    /// Command identifier
    pub cid: u32,
    /// Raw payload
    #[serde(with = "hex")]
    pub raw_payload: Vec<u8>,
}

/// Uplink summary kept in the MAC state history
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacUplink {
    /// Frame counter
    pub f_cnt: u32,
    /// Data rate index
    pub data_rate_index: u32,
    /// Frequency (Hz)
    pub frequency: u64,
    /// Best gateway SNR
    pub snr: f32,
    /// Reception time
    pub received_at: Option<DateTime<Utc>>,
}

/// Downlink summary kept in the MAC state history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacDownlink {
    /// Frame counter
    pub f_cnt: u32,
    /// Whether the downlink was confirmed
    pub confirmed: bool,
    /// Correlation identifiers
    pub correlation_ids: Vec<String>,
}

/// Rejected data rate ranges of a frequency
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataRateRanges {
    /// Rejected `(min, max)` data rate index pairs
    pub ranges: Vec<(u32, u32)>,
}

/// Join request downlink settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlSettings {
    /// RX1 data rate offset
    pub rx1_dr_offset: u32,
    /// RX2 data rate index
    pub rx2_dr: u32,
    /// Whether LoRaWAN 1.1 option negotiation is used
    pub opt_neg: bool,
}

/// Channel list carried in a join-accept
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfList {
    /// Extra channel frequencies, in hundreds of Hz
    pub freq: Vec<u32>,
    /// Channel masks
    pub ch_masks: Vec<bool>,
}

/// Join request accepted by the Network Server and awaiting confirmation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    /// RX1 delay (s)
    pub rx1_delay: u32,
    /// Downlink settings
    pub downlink_settings: Option<DlSettings>,
    /// Channel list
    pub cf_list: Option<CfList>,
}

/// Join request echoed in the queued join-accept
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinAcceptRequest {
    /// Assigned device address
    pub dev_addr: Option<DevAddr>,
    /// Network identifier
    #[serde(with = "hex")]
    pub net_id: Vec<u8>,
    /// RX1 delay (s)
    pub rx1_delay: u32,
    /// Downlink settings
    pub downlink_settings: Option<DlSettings>,
    /// Channel list
    pub cf_list: Option<CfList>,
}

/// Join-accept queued for transmission
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuedJoinAccept {
    /// Session keys derived by the Join Server
    pub keys: SessionKeys,
    /// Encrypted join-accept payload
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
    /// Join request echo
    pub request: JoinAcceptRequest,
    /// Correlation identifiers
    pub correlation_ids: Vec<String>,
}

/// MAC state of a device
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacState {
    /// Parameters in effect
    pub current_parameters: MacParameters,
    /// Parameters the Network Server negotiates towards
    pub desired_parameters: MacParameters,
    /// Device class in effect
    pub device_class: DeviceClass,
    /// Negotiated LoRaWAN MAC version
    pub lorawan_version: Option<MacVersion>,
    /// Last confirmed downlink transmission
    pub last_confirmed_downlink_at: Option<DateTime<Utc>>,
    /// Frame counter of the last DevStatusReq
    pub last_dev_status_f_cnt_up: u32,
    /// Ping slot periodicity
    pub ping_slot_periodicity: Option<Val<u32>>,
    /// Application downlink awaiting acknowledgement
    pub pending_application_downlink: Option<ApplicationDownlink>,
    /// Outstanding MAC requests
    pub pending_requests: Vec<MacCommand>,
    /// MAC responses to piggyback on the next downlink
    pub queued_responses: Vec<MacCommand>,
    /// Join request being negotiated
    pub pending_join_request: Option<JoinRequest>,
    /// Join-accept awaiting transmission
    pub queued_join_accept: Option<QueuedJoinAccept>,
    /// Whether RX windows are open for the last uplink
    pub rx_windows_available: bool,
    /// Recent uplinks, oldest first
    pub recent_uplinks: heapless::Vec<MacUplink, RECENT_CAPACITY>,
    /// Recent downlinks, oldest first
    pub recent_downlinks: heapless::Vec<MacDownlink, RECENT_CAPACITY>,
    /// Last downlink transmission
    pub last_downlink_at: Option<DateTime<Utc>>,
    /// Last network-initiated downlink transmission
    pub last_network_initiated_downlink_at: Option<DateTime<Utc>>,
    /// Frame counter of the last ADR change
    pub last_adr_change_f_cnt_up: u32,
    /// Identifiers of recently handled MAC commands
    pub recent_mac_command_identifiers: Vec<u32>,
    /// Data rate indexes rejected by LinkADRAns
    pub rejected_adr_data_rate_indexes: Vec<u32>,
    /// TX power indexes rejected by LinkADRAns
    pub rejected_adr_tx_power_indexes: Vec<u32>,
    /// Frequencies rejected by NewChannelAns
    pub rejected_frequencies: Vec<u64>,
    /// Data rate ranges rejected per frequency
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rejected_data_rate_ranges: BTreeMap<u64, DataRateRanges>,
}

impl MacState {
    /// Record an uplink, evicting the oldest entry when full
    pub fn push_recent_uplink(&mut self, up: MacUplink) {
        if self.recent_uplinks.is_full() {
            self.recent_uplinks.rotate_left(1);
            self.recent_uplinks.pop();
        }
        // Cannot fail: an entry was just evicted.
        let _ = self.recent_uplinks.push(up);
    }

    /// Record a downlink, evicting the oldest entry when full
    pub fn push_recent_downlink(&mut self, down: MacDownlink) {
        if self.recent_downlinks.is_full() {
            self.recent_downlinks.rotate_left(1);
            self.recent_downlinks.pop();
        }
        let _ = self.recent_downlinks.push(down);
    }
}
