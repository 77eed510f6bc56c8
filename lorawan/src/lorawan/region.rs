//! Regional bands and frequency plans
//!
//! A [`Band`] holds the regional parameters of one band at one regional
//! parameters version. A [`FrequencyPlan`] narrows a band to the channels a
//! deployment actually uses. Both are read-only and resolved through a
//! [`FrequencyPlanStore`].

use std::collections::{BTreeMap, HashMap};

use super::phy::{PhyVersion, TimingParams};
use crate::error::{Error, Result};

/// EU 863-870 MHz band identifier
pub const EU_863_870: &str = "EU_863_870";
/// US 902-928 MHz band identifier
pub const US_902_928: &str = "US_902_928";
/// AS 923 MHz band identifier
pub const AS_923: &str = "AS_923";

/// Modulation of a data rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataRate {
    /// LoRa modulation
    Lora {
        /// Spreading factor
        spreading_factor: u8,
        /// Bandwidth in Hz
        bandwidth: u32,
    },
    /// FSK modulation
    Fsk {
        /// Bit rate in bit/s
        bit_rate: u32,
    },
}

impl DataRate {
    const fn lora(spreading_factor: u8, bandwidth: u32) -> Self {
        DataRate::Lora {
            spreading_factor,
            bandwidth,
        }
    }
}

/// Channel definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    /// Channel frequency in Hz
    pub frequency: u64,
    /// Minimum data rate index
    pub min_data_rate: u32,
    /// Maximum data rate index
    pub max_data_rate: u32,
}

impl Channel {
    const fn new(frequency: u64, min_data_rate: u32, max_data_rate: u32) -> Self {
        Self {
            frequency,
            min_data_rate,
            max_data_rate,
        }
    }
}

/// Duty-cycled frequency range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubBand {
    /// Lowest frequency in Hz
    pub min_frequency: u64,
    /// Highest frequency in Hz
    pub max_frequency: u64,
    /// Duty cycle, 0.0 to 1.0
    pub duty_cycle: f32,
}

impl SubBand {
    /// Whether `frequency` lies within the sub-band
    pub fn contains(&self, frequency: u64) -> bool {
        self.min_frequency <= frequency && frequency <= self.max_frequency
    }
}

/// Content of the CFList sent in join-accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfListType {
    /// Extra channel frequencies
    Frequencies,
    /// Channel masks over the fixed channel plan
    ChannelMasks,
}

/// Class B beacon parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Beacon {
    /// Beacon data rate index
    pub data_rate_index: u32,
    /// Beacon frequencies in Hz
    pub frequencies: Vec<u64>,
}

/// Relay wake-on-radio channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayWorChannel {
    /// Wake-on-radio frequency in Hz
    pub frequency: u64,
    /// ACK frequency in Hz
    pub ack_frequency: u64,
    /// Data rate index
    pub data_rate_index: u32,
}

/// Regional parameters of a band
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    /// Band identifier
    pub id: &'static str,
    /// Regional parameters version
    pub version: PhyVersion,
    /// Defined data rates by index
    pub data_rates: BTreeMap<u32, DataRate>,
    /// Highest data rate index ADR may select
    pub max_adr_data_rate_index: u32,
    /// Highest TX power index
    pub max_tx_power_index: u32,
    /// Maximum number of uplink channels
    pub max_uplink_channels: usize,
    /// Maximum number of downlink channels
    pub max_downlink_channels: usize,
    /// Default uplink channels
    pub uplink_channels: Vec<Channel>,
    /// Default downlink channels
    pub downlink_channels: Vec<Channel>,
    /// Duty-cycled sub-bands
    pub sub_bands: Vec<SubBand>,
    /// CFList content
    pub cf_list_type: CfListType,
    /// Whether the network may drive the data rate
    pub supports_dynamic_adr: bool,
    /// Whether TxParamSetupReq is defined
    pub tx_param_setup_req_support: bool,
    /// Default maximum EIRP in dBm
    pub default_max_eirp: f32,
    /// Receive window timing
    pub timing: TimingParams,
    /// Default RX2 frequency in Hz
    pub default_rx2_frequency: u64,
    /// Default RX2 data rate index
    pub default_rx2_data_rate_index: u32,
    /// ADR ACK limit exponent
    pub adr_ack_limit_exponent: u32,
    /// ADR ACK delay exponent
    pub adr_ack_delay_exponent: u32,
    /// Class B ping slot frequencies; empty when ping slots hop with the beacon
    pub ping_slot_frequencies: Vec<u64>,
    /// Default ping slot data rate index
    pub default_ping_slot_data_rate_index: u32,
    /// Class B beacon
    pub beacon: Beacon,
    /// Relay wake-on-radio channels
    pub relay_wor_channels: Vec<RelayWorChannel>,
    /// Dwell time in effect before TxParamSetupReq, (uplinks, downlinks)
    pub boot_dwell_time: (Option<bool>, Option<bool>),
}

impl Band {
    /// Look up band `id` at regional parameters `version`
    pub fn get(id: &str, version: PhyVersion) -> Result<Self> {
        let unsupported = || Error::UnsupportedPhyVersion {
            band_id: id.to_string(),
            version: format!("{:?}", version),
        };
        match id {
            EU_863_870 => Ok(eu_863_870(version)),
            US_902_928 => Ok(us_902_928(version)),
            AS_923 if version == PhyVersion::V1_0 => Err(unsupported()),
            AS_923 => Ok(as_923(version)),
            _ => Err(unsupported()),
        }
    }

    /// Whether data rate `index` is defined
    pub fn has_data_rate(&self, index: u32) -> bool {
        self.data_rates.contains_key(&index)
    }
}

fn data_rates(rates: &[(u32, DataRate)]) -> BTreeMap<u32, DataRate> {
    rates.iter().copied().collect()
}

const EU_RX2_FREQUENCY: u64 = 869_525_000;

fn eu_863_870(version: PhyVersion) -> Band {
    let channels = vec![
        Channel::new(868_100_000, 0, 5),
        Channel::new(868_300_000, 0, 5),
        Channel::new(868_500_000, 0, 5),
    ];
    Band {
        id: EU_863_870,
        version,
        data_rates: data_rates(&[
            (0, DataRate::lora(12, 125_000)),
            (1, DataRate::lora(11, 125_000)),
            (2, DataRate::lora(10, 125_000)),
            (3, DataRate::lora(9, 125_000)),
            (4, DataRate::lora(8, 125_000)),
            (5, DataRate::lora(7, 125_000)),
            (6, DataRate::lora(7, 250_000)),
            (7, DataRate::Fsk { bit_rate: 50_000 }),
        ]),
        max_adr_data_rate_index: 5,
        max_tx_power_index: 7,
        max_uplink_channels: 16,
        max_downlink_channels: 16,
        uplink_channels: channels.clone(),
        downlink_channels: channels,
        sub_bands: vec![
            SubBand {
                min_frequency: 863_000_000,
                max_frequency: 865_000_000,
                duty_cycle: 0.001,
            },
            SubBand {
                min_frequency: 865_000_000,
                max_frequency: 868_000_000,
                duty_cycle: 0.01,
            },
            SubBand {
                min_frequency: 868_000_000,
                max_frequency: 868_600_000,
                duty_cycle: 0.01,
            },
            SubBand {
                min_frequency: 868_700_000,
                max_frequency: 869_200_000,
                duty_cycle: 0.001,
            },
            SubBand {
                min_frequency: 869_400_000,
                max_frequency: 869_650_000,
                duty_cycle: 0.1,
            },
            SubBand {
                min_frequency: 869_700_000,
                max_frequency: 870_000_000,
                duty_cycle: 0.01,
            },
        ],
        cf_list_type: CfListType::Frequencies,
        supports_dynamic_adr: true,
        tx_param_setup_req_support: false,
        default_max_eirp: 16.0,
        timing: TimingParams::default(),
        default_rx2_frequency: EU_RX2_FREQUENCY,
        default_rx2_data_rate_index: 0,
        adr_ack_limit_exponent: 6,
        adr_ack_delay_exponent: 5,
        ping_slot_frequencies: vec![EU_RX2_FREQUENCY],
        default_ping_slot_data_rate_index: 3,
        beacon: Beacon {
            data_rate_index: 3,
            frequencies: vec![EU_RX2_FREQUENCY],
        },
        relay_wor_channels: vec![
            RelayWorChannel {
                frequency: 865_100_000,
                ack_frequency: 865_300_000,
                data_rate_index: 3,
            },
            RelayWorChannel {
                frequency: 865_500_000,
                ack_frequency: 865_900_000,
                data_rate_index: 3,
            },
        ],
        boot_dwell_time: (None, None),
    }
}

fn us_902_928(version: PhyVersion) -> Band {
    // 64 125 kHz channels followed by 8 500 kHz channels
    let mut uplink_channels: Vec<Channel> = (0..64)
        .map(|i| Channel::new(902_300_000 + i * 200_000, 0, 3))
        .collect();
    uplink_channels.extend((0..8).map(|i| Channel::new(903_000_000 + i * 1_600_000, 4, 4)));
    let downlink_channels: Vec<Channel> = (0..8)
        .map(|i| Channel::new(923_300_000 + i * 600_000, 8, 13))
        .collect();
    let beacon_frequencies: Vec<u64> = downlink_channels.iter().map(|ch| ch.frequency).collect();
    Band {
        id: US_902_928,
        version,
        data_rates: data_rates(&[
            (0, DataRate::lora(10, 125_000)),
            (1, DataRate::lora(9, 125_000)),
            (2, DataRate::lora(8, 125_000)),
            (3, DataRate::lora(7, 125_000)),
            (4, DataRate::lora(8, 500_000)),
            (8, DataRate::lora(12, 500_000)),
            (9, DataRate::lora(11, 500_000)),
            (10, DataRate::lora(10, 500_000)),
            (11, DataRate::lora(9, 500_000)),
            (12, DataRate::lora(8, 500_000)),
            (13, DataRate::lora(7, 500_000)),
        ]),
        max_adr_data_rate_index: 3,
        max_tx_power_index: 14,
        max_uplink_channels: 72,
        max_downlink_channels: 8,
        uplink_channels,
        downlink_channels,
        sub_bands: vec![SubBand {
            min_frequency: 902_000_000,
            max_frequency: 928_000_000,
            duty_cycle: 1.0,
        }],
        cf_list_type: CfListType::ChannelMasks,
        supports_dynamic_adr: true,
        tx_param_setup_req_support: false,
        default_max_eirp: 30.0,
        timing: TimingParams::default(),
        default_rx2_frequency: 923_300_000,
        default_rx2_data_rate_index: 8,
        adr_ack_limit_exponent: 6,
        adr_ack_delay_exponent: 5,
        ping_slot_frequencies: Vec::new(),
        default_ping_slot_data_rate_index: 8,
        beacon: Beacon {
            data_rate_index: 8,
            frequencies: beacon_frequencies,
        },
        relay_wor_channels: vec![RelayWorChannel {
            frequency: 915_200_000,
            ack_frequency: 915_600_000,
            data_rate_index: 10,
        }],
        boot_dwell_time: (None, None),
    }
}

fn as_923(version: PhyVersion) -> Band {
    let channels = vec![Channel::new(923_200_000, 0, 5), Channel::new(923_400_000, 0, 5)];
    Band {
        id: AS_923,
        version,
        data_rates: data_rates(&[
            (0, DataRate::lora(12, 125_000)),
            (1, DataRate::lora(11, 125_000)),
            (2, DataRate::lora(10, 125_000)),
            (3, DataRate::lora(9, 125_000)),
            (4, DataRate::lora(8, 125_000)),
            (5, DataRate::lora(7, 125_000)),
            (6, DataRate::lora(7, 250_000)),
            (7, DataRate::Fsk { bit_rate: 50_000 }),
        ]),
        max_adr_data_rate_index: 5,
        max_tx_power_index: 7,
        max_uplink_channels: 16,
        max_downlink_channels: 16,
        uplink_channels: channels.clone(),
        downlink_channels: channels,
        sub_bands: vec![SubBand {
            min_frequency: 915_000_000,
            max_frequency: 928_000_000,
            duty_cycle: 0.01,
        }],
        cf_list_type: CfListType::Frequencies,
        supports_dynamic_adr: true,
        tx_param_setup_req_support: true,
        default_max_eirp: 16.0,
        timing: TimingParams::default(),
        default_rx2_frequency: 923_200_000,
        default_rx2_data_rate_index: 2,
        adr_ack_limit_exponent: 6,
        adr_ack_delay_exponent: 5,
        ping_slot_frequencies: vec![923_400_000],
        default_ping_slot_data_rate_index: 3,
        beacon: Beacon {
            data_rate_index: 3,
            frequencies: vec![923_400_000],
        },
        relay_wor_channels: vec![RelayWorChannel {
            frequency: 923_600_000,
            ack_frequency: 923_800_000,
            data_rate_index: 3,
        }],
        boot_dwell_time: (Some(true), Some(true)),
    }
}

/// Dwell time restrictions of a frequency plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DwellTime {
    /// Uplink dwell time
    pub uplinks: Option<bool>,
    /// Downlink dwell time
    pub downlinks: Option<bool>,
}

/// Deployment-specific narrowing of a band
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrequencyPlan {
    /// Plan identifier
    pub id: String,
    /// Band the plan is defined on
    pub band_id: String,
    /// Sub-bands in addition to the band's
    pub sub_bands: Vec<SubBand>,
    /// Uplink channels
    pub uplink_channels: Vec<Channel>,
    /// Downlink channels, parallel to `uplink_channels` when present
    pub downlink_channels: Vec<Channel>,
    /// LoRa standard channel
    pub lora_standard_channel: Option<Channel>,
    /// RX2 override
    pub rx2_channel: Option<Channel>,
    /// Class B ping slot override
    pub ping_slot: Option<Channel>,
    /// Maximum EIRP override in dBm
    pub max_eirp: Option<f32>,
    /// Dwell time restrictions
    pub dwell_time: DwellTime,
}

impl FrequencyPlan {
    /// Plan sub-band containing `frequency`
    pub fn find_sub_band(&self, frequency: u64) -> Option<&SubBand> {
        self.sub_bands.iter().find(|sb| sb.contains(frequency))
    }
}

/// Read-only lookup of frequency plans and bands
pub trait FrequencyPlanStore: Send + Sync {
    /// Frequency plan `id`
    fn get(&self, id: &str) -> Result<FrequencyPlan>;

    /// Frequency plan `id` and its band at `version`
    fn resolve(&self, id: &str, version: PhyVersion) -> Result<(FrequencyPlan, Band)> {
        let plan = self.get(id)?;
        let band = Band::get(&plan.band_id, version)?;
        Ok((plan, band))
    }
}

/// In-memory frequency plan store
#[derive(Debug, Clone, Default)]
pub struct StaticPlanStore {
    plans: HashMap<String, FrequencyPlan>,
}

impl StaticPlanStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the built-in plans `EU_863_870`, `EU_863_870_TTN`,
    /// `US_902_928_FSB_2` and `AS_923`
    pub fn with_builtin() -> Self {
        let mut store = Self::new();
        store.insert(FrequencyPlan {
            id: "EU_863_870".into(),
            band_id: EU_863_870.into(),
            ..Default::default()
        });
        store.insert(FrequencyPlan {
            id: "EU_863_870_TTN".into(),
            band_id: EU_863_870.into(),
            uplink_channels: [
                868_100_000,
                868_300_000,
                868_500_000,
                867_100_000,
                867_300_000,
                867_500_000,
                867_700_000,
                867_900_000,
            ]
            .iter()
            .map(|f| Channel::new(*f, 0, 5))
            .collect(),
            lora_standard_channel: Some(Channel::new(868_300_000, 6, 6)),
            rx2_channel: Some(Channel::new(EU_RX2_FREQUENCY, 3, 3)),
            ping_slot: Some(Channel::new(EU_RX2_FREQUENCY, 3, 3)),
            ..Default::default()
        });
        store.insert(FrequencyPlan {
            id: "US_902_928_FSB_2".into(),
            band_id: US_902_928.into(),
            uplink_channels: (8..16)
                .map(|i| Channel::new(902_300_000 + i * 200_000, 0, 3))
                .chain(std::iter::once(Channel::new(904_600_000, 4, 4)))
                .collect(),
            ..Default::default()
        });
        store.insert(FrequencyPlan {
            id: "AS_923".into(),
            band_id: AS_923.into(),
            dwell_time: DwellTime {
                uplinks: Some(true),
                downlinks: Some(false),
            },
            ..Default::default()
        });
        store
    }

    /// Add or replace a plan
    pub fn insert(&mut self, plan: FrequencyPlan) {
        self.plans.insert(plan.id.clone(), plan);
    }
}

impl FrequencyPlanStore for StaticPlanStore {
    fn get(&self, id: &str) -> Result<FrequencyPlan> {
        self.plans
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownFrequencyPlan { id: id.to_string() })
    }
}
