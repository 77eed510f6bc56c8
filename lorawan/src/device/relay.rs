//! Relay configuration shared by MAC settings and MAC parameters
//!
//! A relay is either `served` (the end device is behind a relay) or
//! `serving` (the end device is itself a relay). At most one of the two is
//! populated.

use serde::{Deserialize, Serialize};

/// Relay parameters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayParameters {
    /// Relay mode
    pub mode: Option<RelayMode>,
}

/// Served or serving relay mode
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayMode {
    /// End device is served by a relay
    pub served: Option<ServedRelay>,
    /// End device serves as a relay
    pub serving: Option<ServingRelay>,
}

/// Parameters of a device served by a relay
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServedRelay {
    /// Activation mode
    pub mode: Option<ServedRelayMode>,
    /// Number of uplinks sent before backing off
    pub backoff: u32,
    /// Second wake-on-radio channel
    pub second_channel: Option<SecondChannel>,
    /// Identifier of the serving device
    pub serving_device_id: String,
}

/// Activation mode of a served device
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServedRelayMode {
    /// Always use the relay
    pub always: Option<Empty>,
    /// Use the relay after missed downlinks
    pub dynamic: Option<DynamicRelayMode>,
    /// Device decides
    pub end_device_controlled: Option<Empty>,
}

/// Dynamic activation parameters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicRelayMode {
    /// Smart enable level
    pub smart_enable_level: u32,
}

/// Marker message with no fields
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Second wake-on-radio channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondChannel {
    /// ACK offset
    pub ack_offset: u32,
    /// Data rate index
    pub data_rate_index: u32,
    /// Frequency (Hz)
    pub frequency: u64,
}

/// Parameters of a device serving as relay
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingRelay {
    /// Second wake-on-radio channel
    pub second_channel: Option<SecondChannel>,
    /// Index of the default wake-on-radio channel
    pub default_channel_index: Option<u32>,
    /// Channel activity detection periodicity
    pub cad_periodicity: u32,
    /// Forwarding rules for served devices
    pub uplink_forwarding_rules: Vec<ForwardingRule>,
    /// Forwarding rate limits
    pub limits: Option<ServingLimits>,
}

/// Uplink forwarding rule
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingRule {
    /// Rate limit for the served device
    pub limits: Option<Limit>,
    /// Last wake-on-radio frame counter
    pub last_w_f_cnt: u32,
    /// Served device identifier
    pub device_id: String,
    /// Session key identifier of the served device
    #[serde(with = "hex")]
    pub session_key_id: Vec<u8>,
}

/// Token bucket limit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limit {
    /// Bucket size
    pub bucket_size: u32,
    /// Reload rate
    pub reload_rate: u32,
}

/// Rate limits of a serving relay
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingLimits {
    /// Reset behavior
    pub reset_behavior: u32,
    /// Join request limit
    pub join_requests: Option<Limit>,
    /// Notification limit
    pub notifications: Option<Limit>,
    /// Uplink message limit
    pub uplink_messages: Option<Limit>,
    /// Overall limit
    pub overall: Option<Limit>,
}

/// Paths of every relay leaf, relative to a `relay` field
pub const RELAY_LEAVES: &[&str] = &[
    "mode.served.backoff",
    "mode.served.mode.always",
    "mode.served.mode.dynamic.smart_enable_level",
    "mode.served.mode.end_device_controlled",
    "mode.served.second_channel.ack_offset",
    "mode.served.second_channel.data_rate_index",
    "mode.served.second_channel.frequency",
    "mode.served.serving_device_id",
    "mode.serving.cad_periodicity",
    "mode.serving.default_channel_index",
    "mode.serving.limits.join_requests.bucket_size",
    "mode.serving.limits.join_requests.reload_rate",
    "mode.serving.limits.notifications.bucket_size",
    "mode.serving.limits.notifications.reload_rate",
    "mode.serving.limits.overall.bucket_size",
    "mode.serving.limits.overall.reload_rate",
    "mode.serving.limits.reset_behavior",
    "mode.serving.limits.uplink_messages.bucket_size",
    "mode.serving.limits.uplink_messages.reload_rate",
    "mode.serving.second_channel.ack_offset",
    "mode.serving.second_channel.data_rate_index",
    "mode.serving.second_channel.frequency",
    "mode.serving.uplink_forwarding_rules",
];

impl RelayParameters {
    /// Served relay parameters, if any
    pub fn served(&self) -> Option<&ServedRelay> {
        self.mode.as_ref()?.served.as_ref()
    }

    /// Serving relay parameters, if any
    pub fn serving(&self) -> Option<&ServingRelay> {
        self.mode.as_ref()?.serving.as_ref()
    }
}
