//! MAC versions and fresh MAC state construction
//!
//! [`MacStateBuilder`] produces the MAC state a device starts a session with.
//! Parameters are looked up in this order:
//! - the device's own MAC settings
//! - the MAC settings profile, when the device references one
//! - the network defaults
//! - the frequency plan (desired parameters only) and the band

use serde::{Deserialize, Serialize};

use super::region::{Band, CfListType, FrequencyPlan, FrequencyPlanStore};
use crate::device::mac_state::MacChannel;
use crate::device::{DeviceClass, EndDevice, MacParameters, MacSettings, MacState, Val};
use crate::error::{Error, Result};

/// LoRaWAN MAC version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MacVersion {
    /// LoRaWAN 1.0
    #[serde(rename = "MAC_V1_0")]
    V1_0,
    /// LoRaWAN 1.0.1
    #[serde(rename = "MAC_V1_0_1")]
    V1_0_1,
    /// LoRaWAN 1.0.2
    #[serde(rename = "MAC_V1_0_2")]
    V1_0_2,
    /// LoRaWAN 1.0.3
    #[serde(rename = "MAC_V1_0_3")]
    V1_0_3,
    /// LoRaWAN 1.0.4
    #[serde(rename = "MAC_V1_0_4")]
    V1_0_4,
    /// LoRaWAN 1.1
    #[serde(rename = "MAC_V1_1")]
    V1_1,
}

impl MacVersion {
    /// Whether the version derives separate network session keys from NwkKey
    pub fn use_nwk_key(self) -> bool {
        self >= MacVersion::V1_1
    }

    /// Whether ABP devices of this version must carry a DevEUI
    pub fn requires_dev_eui_for_abp(self) -> bool {
        self >= MacVersion::V1_0_4 && self != MacVersion::V1_1
    }

    /// Whether the device reports its class through DeviceModeInd
    pub fn use_device_mode_ind(self) -> bool {
        self >= MacVersion::V1_1
    }
}

/// Builds the MAC state of a device that has none
pub trait MacStateBuilder: Send + Sync {
    /// Fresh MAC state for `dev`
    fn new_state(
        &self,
        dev: &EndDevice,
        plans: &dyn FrequencyPlanStore,
        defaults: &MacSettings,
        profile: Option<&MacSettings>,
    ) -> Result<MacState>;
}

/// Builder deriving the MAC state from settings and regional parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMacStateBuilder;

/// Frequency plan and band of `dev`
pub fn device_plan_and_band(
    dev: &EndDevice,
    plans: &dyn FrequencyPlanStore,
) -> Result<(FrequencyPlan, Band)> {
    let phy = dev
        .lorawan_phy_version
        .ok_or_else(|| Error::invalid_field("lorawan_phy_version"))?;
    plans.resolve(&dev.frequency_plan_id, phy)
}

/// Default class of `dev` before any DeviceModeInd
pub fn device_default_class(dev: &EndDevice) -> Result<DeviceClass> {
    let mode_ind = dev.lorawan_version.map_or(false, MacVersion::use_device_mode_ind);
    if !mode_ind && dev.supports_class_c {
        Ok(DeviceClass::C)
    } else if !dev.multicast {
        Ok(DeviceClass::A)
    } else if dev.supports_class_c {
        Ok(DeviceClass::C)
    } else if dev.supports_class_b {
        Ok(DeviceClass::B)
    } else {
        Err(Error::invalid_field("supports_class_b"))
    }
}

// Settings layers, most specific first
struct Layers<'a>([Option<&'a MacSettings>; 3]);

impl<'a> Layers<'a> {
    fn find<T>(&self, f: impl Fn(&'a MacSettings) -> Option<T>) -> Option<T> {
        self.0.iter().flatten().find_map(|s| f(*s))
    }

    fn value<T: Copy>(&self, f: impl Fn(&'a MacSettings) -> Option<Val<T>>) -> Option<T> {
        self.find(|s| f(s).map(|v| v.value))
    }

    fn non_zero(&self, f: impl Fn(&'a MacSettings) -> Option<Val<u64>>) -> Option<u64> {
        self.find(|s| f(s).map(|v| v.value).filter(|v| *v != 0))
    }

    fn factory_preset_frequencies(&self) -> &'a [u64] {
        self.find(|s| Some(&s.factory_preset_frequencies).filter(|f| !f.is_empty()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn single<T: Copy>(values: &[T]) -> Option<T> {
    match values {
        [v] => Some(*v),
        _ => None,
    }
}

fn default_channels(dev: &EndDevice, band: &Band, presets: &[u64]) -> Vec<MacChannel> {
    let mut channels: Vec<MacChannel> = band
        .uplink_channels
        .iter()
        .enumerate()
        .map(|(i, up)| {
            let downlink_frequency = band
                .downlink_channels
                .get(i % band.downlink_channels.len().max(1))
                .map_or(up.frequency, |ch| ch.frequency);
            if dev.multicast {
                return MacChannel {
                    downlink_frequency,
                    ..Default::default()
                };
            }
            MacChannel {
                uplink_frequency: up.frequency,
                downlink_frequency,
                min_data_rate_index: up.min_data_rate,
                max_data_rate_index: up.max_data_rate,
                enable_uplink: presets.is_empty(),
            }
        })
        .collect();

    for &frequency in presets {
        if let Some(ch) = channels.iter_mut().find(|ch| ch.uplink_frequency == frequency) {
            ch.enable_uplink = true;
            continue;
        }
        if band.cf_list_type == CfListType::ChannelMasks {
            continue;
        }
        channels.push(if dev.multicast {
            MacChannel {
                downlink_frequency: frequency,
                ..Default::default()
            }
        } else {
            MacChannel {
                uplink_frequency: frequency,
                downlink_frequency: frequency,
                min_data_rate_index: 0,
                max_data_rate_index: band.max_adr_data_rate_index,
                enable_uplink: true,
            }
        });
    }
    channels
}

fn desired_channels(default: &[MacChannel], band: &Band, plan: &FrequencyPlan) -> Vec<MacChannel> {
    let mut channels: Vec<MacChannel> = default
        .iter()
        .map(|ch| MacChannel {
            enable_uplink: false,
            ..ch.clone()
        })
        .collect();
    match band.cf_list_type {
        CfListType::ChannelMasks => {
            for up in &plan.uplink_channels {
                if let Some(ch) = channels.iter_mut().find(|ch| ch.uplink_frequency == up.frequency) {
                    ch.enable_uplink = true;
                }
            }
            if let Some(standard) = &plan.lora_standard_channel {
                if let Some(ch) = channels.iter_mut().find(|ch| ch.uplink_frequency == standard.frequency) {
                    ch.enable_uplink = true;
                    ch.min_data_rate_index = standard.min_data_rate;
                    ch.max_data_rate_index = standard.max_data_rate;
                }
            }
        }
        CfListType::Frequencies => {
            for (i, up) in plan.uplink_channels.iter().enumerate() {
                if let Some(ch) = channels.iter_mut().find(|ch| ch.uplink_frequency == up.frequency) {
                    ch.min_data_rate_index = up.min_data_rate;
                    ch.max_data_rate_index = up.max_data_rate;
                    ch.enable_uplink = true;
                    continue;
                }
                channels.push(MacChannel {
                    uplink_frequency: up.frequency,
                    downlink_frequency: plan.downlink_channels.get(i).map_or(up.frequency, |ch| ch.frequency),
                    min_data_rate_index: up.min_data_rate,
                    max_data_rate_index: up.max_data_rate,
                    enable_uplink: true,
                });
            }
        }
    }
    channels
}

impl MacStateBuilder for DefaultMacStateBuilder {
    fn new_state(
        &self,
        dev: &EndDevice,
        plans: &dyn FrequencyPlanStore,
        defaults: &MacSettings,
        profile: Option<&MacSettings>,
    ) -> Result<MacState> {
        let (plan, band) = device_plan_and_band(dev, plans)?;
        let device_class = device_default_class(dev)?;
        let layers = Layers([dev.mac_settings.as_ref(), profile, Some(defaults)]);

        let default_channels = default_channels(dev, &band, layers.factory_preset_frequencies());
        let current = MacParameters {
            max_eirp: band.default_max_eirp,
            adr_data_rate_index: 0,
            adr_tx_power_index: 0,
            adr_nb_trans: 1,
            adr_ack_limit_exponent: Val::some(band.adr_ack_limit_exponent),
            adr_ack_delay_exponent: Val::some(band.adr_ack_delay_exponent),
            rx1_data_rate_offset: layers.value(|s| s.rx1_data_rate_offset).unwrap_or(0),
            rx1_delay: layers.value(|s| s.rx1_delay).unwrap_or(band.timing.rx1_delay),
            rx2_data_rate_index: layers
                .value(|s| s.rx2_data_rate_index)
                .unwrap_or(band.default_rx2_data_rate_index),
            rx2_frequency: layers
                .non_zero(|s| s.rx2_frequency)
                .unwrap_or(band.default_rx2_frequency),
            max_duty_cycle: layers.value(|s| s.max_duty_cycle).unwrap_or(0),
            rejoin_time_periodicity: 0,
            rejoin_count_periodicity: 0,
            ping_slot_frequency: layers
                .non_zero(|s| s.ping_slot_frequency)
                .or_else(|| single(&band.ping_slot_frequencies))
                .unwrap_or(0),
            ping_slot_data_rate_index_value: Val::some(
                layers
                    .value(|s| s.ping_slot_data_rate_index)
                    .unwrap_or(band.default_ping_slot_data_rate_index),
            ),
            beacon_frequency: layers
                .non_zero(|s| s.beacon_frequency)
                .or_else(|| single(&band.beacon.frequencies))
                .unwrap_or(0),
            channels: default_channels.clone(),
            uplink_dwell_time: layers
                .value(|s| s.uplink_dwell_time)
                .or(band.boot_dwell_time.0)
                .map(|value| Val { value }),
            downlink_dwell_time: layers
                .value(|s| s.downlink_dwell_time)
                .or(band.boot_dwell_time.1)
                .map(|value| Val { value }),
            relay: layers.find(|s| s.relay.clone()),
        };

        let desired = if dev.multicast {
            current.clone()
        } else {
            MacParameters {
                max_eirp: layers
                    .value(|s| s.desired_max_eirp)
                    .or(plan.max_eirp)
                    .unwrap_or(band.default_max_eirp),
                rx1_data_rate_offset: layers
                    .value(|s| s.desired_rx1_data_rate_offset)
                    .unwrap_or(current.rx1_data_rate_offset),
                rx1_delay: layers.value(|s| s.desired_rx1_delay).unwrap_or(current.rx1_delay),
                rx2_data_rate_index: layers
                    .value(|s| s.desired_rx2_data_rate_index)
                    .or(plan.rx2_channel.map(|ch| ch.max_data_rate))
                    .unwrap_or(current.rx2_data_rate_index),
                rx2_frequency: layers
                    .non_zero(|s| s.desired_rx2_frequency)
                    .or(plan.rx2_channel.map(|ch| ch.frequency))
                    .unwrap_or(current.rx2_frequency),
                max_duty_cycle: layers
                    .value(|s| s.desired_max_duty_cycle)
                    .unwrap_or(current.max_duty_cycle),
                ping_slot_frequency: layers
                    .non_zero(|s| s.desired_ping_slot_frequency)
                    .or(plan.ping_slot.map(|ch| ch.frequency).filter(|f| *f != 0))
                    .unwrap_or(current.ping_slot_frequency),
                ping_slot_data_rate_index_value: layers
                    .value(|s| s.desired_ping_slot_data_rate_index)
                    .or(plan.ping_slot.map(|ch| ch.max_data_rate))
                    .map(|value| Val { value })
                    .or(current.ping_slot_data_rate_index_value),
                beacon_frequency: layers
                    .non_zero(|s| s.desired_beacon_frequency)
                    .unwrap_or(current.beacon_frequency),
                channels: desired_channels(&default_channels, &band, &plan),
                uplink_dwell_time: plan
                    .dwell_time
                    .uplinks
                    .or(band.boot_dwell_time.0)
                    .map(|value| Val { value }),
                downlink_dwell_time: plan
                    .dwell_time
                    .downlinks
                    .or(band.boot_dwell_time.1)
                    .map(|value| Val { value }),
                adr_ack_limit_exponent: layers
                    .find(|s| s.desired_adr_ack_limit_exponent)
                    .or(current.adr_ack_limit_exponent),
                adr_ack_delay_exponent: layers
                    .find(|s| s.desired_adr_ack_delay_exponent)
                    .or(current.adr_ack_delay_exponent),
                relay: layers.find(|s| s.desired_relay.clone()).or_else(|| current.relay.clone()),
                ..current.clone()
            }
        };

        Ok(MacState {
            current_parameters: current,
            desired_parameters: desired,
            device_class,
            lorawan_version: dev.lorawan_version,
            ping_slot_periodicity: layers.find(|s| s.ping_slot_periodicity),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EndDeviceIdentifiers;
    use crate::lorawan::phy::PhyVersion;
    use crate::lorawan::region::StaticPlanStore;

    fn device(plan: &str) -> EndDevice {
        EndDevice {
            frequency_plan_id: plan.into(),
            lorawan_version: Some(MacVersion::V1_0_3),
            lorawan_phy_version: Some(PhyVersion::Rp001V1_0_3RevA),
            ..EndDevice::new(EndDeviceIdentifiers::new("app", "dev"))
        }
    }

    #[test]
    fn test_mac_version_predicates() {
        assert!(!MacVersion::V1_0_3.use_nwk_key());
        assert!(MacVersion::V1_1.use_nwk_key());
        assert!(MacVersion::V1_0_4.requires_dev_eui_for_abp());
        assert!(!MacVersion::V1_1.requires_dev_eui_for_abp());
        assert!(!MacVersion::V1_0_2.requires_dev_eui_for_abp());
    }

    #[test]
    fn test_default_class() {
        let mut dev = device("EU_863_870");
        assert_eq!(device_default_class(&dev).unwrap(), DeviceClass::A);
        dev.multicast = true;
        assert!(device_default_class(&dev).is_err());
        dev.supports_class_b = true;
        assert_eq!(device_default_class(&dev).unwrap(), DeviceClass::B);
        dev.supports_class_c = true;
        assert_eq!(device_default_class(&dev).unwrap(), DeviceClass::C);
    }

    #[test]
    fn test_new_state_eu() {
        let plans = StaticPlanStore::with_builtin();
        let dev = device("EU_863_870_TTN");
        let st = DefaultMacStateBuilder
            .new_state(&dev, &plans, &MacSettings::default(), None)
            .unwrap();
        assert_eq!(st.current_parameters.channels.len(), 3);
        assert_eq!(st.desired_parameters.channels.len(), 8);
        assert_eq!(st.current_parameters.rx2_frequency, 869_525_000);
        assert_eq!(st.desired_parameters.rx2_data_rate_index, 3);
        assert_eq!(st.current_parameters.adr_nb_trans, 1);
        assert_eq!(st.lorawan_version, Some(MacVersion::V1_0_3));
    }

    #[test]
    fn test_new_state_multicast() {
        let plans = StaticPlanStore::with_builtin();
        let mut dev = device("EU_863_870");
        dev.multicast = true;
        dev.supports_class_c = true;
        let st = DefaultMacStateBuilder
            .new_state(&dev, &plans, &MacSettings::default(), None)
            .unwrap();
        assert_eq!(st.current_parameters, st.desired_parameters);
        assert_eq!(st.device_class, DeviceClass::C);
        assert!(st.current_parameters.channels.iter().all(|ch| ch.uplink_frequency == 0));
    }

    #[test]
    fn test_device_settings_take_precedence() {
        let plans = StaticPlanStore::with_builtin();
        let mut dev = device("EU_863_870");
        dev.mac_settings = Some(MacSettings {
            rx1_delay: Val::some(3),
            ..Default::default()
        });
        let defaults = MacSettings {
            rx1_delay: Val::some(5),
            desired_rx1_delay: Val::some(5),
            ..Default::default()
        };
        let st = DefaultMacStateBuilder.new_state(&dev, &plans, &defaults, None).unwrap();
        assert_eq!(st.current_parameters.rx1_delay, 3);
        assert_eq!(st.desired_parameters.rx1_delay, 5);
    }
}
