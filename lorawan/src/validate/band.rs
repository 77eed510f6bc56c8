//! Checks of MAC settings and MAC state against the band
//!
//! Band checks need the effective frequency plan and PHY version, so every
//! check of one call is registered as a single deferred check that resolves
//! the band once. When the frequency plan or PHY version is set, every check
//! runs, since stored values may no longer fit the new band. Otherwise only
//! the checks of set fields run.

use std::sync::Arc;

use crate::device::mac_settings::{DynamicAdr, ADR_OVERRIDE_COUNT};
use crate::device::relay::RelayParameters;
use crate::device::{EndDevice, MacParameters, MacSettings, MacSettingsProfile, Val};
use crate::error::{Error, Result};
use crate::lorawan::region::{Band, CfListType, FrequencyPlan, FrequencyPlanStore};
use crate::path::FieldPath;
use crate::state::{FieldBag, SetDeviceState};

use super::rules::adr_settings_fields;

type SettingsCheck = fn(&MacSettings, &FrequencyPlan, &Band) -> bool;
type ParametersCheck = fn(&MacParameters, &Band) -> bool;
type ParametersOf = fn(&EndDevice) -> Option<&MacParameters>;

fn has_data_rate(band: &Band, index: Option<Val<u32>>) -> bool {
    index.map_or(true, |i| band.has_data_rate(i.value))
}

fn has_adr_data_rate(band: &Band, index: Option<Val<u32>>) -> bool {
    index.map_or(true, |i| {
        band.has_data_rate(i.value) && i.value <= band.max_adr_data_rate_index
    })
}

fn served_data_rate(band: &Band, relay: Option<&RelayParameters>) -> bool {
    relay
        .and_then(RelayParameters::served)
        .and_then(|s| s.second_channel.as_ref())
        .map_or(true, |ch| band.has_data_rate(ch.data_rate_index))
}

fn serving_data_rate(band: &Band, relay: Option<&RelayParameters>) -> bool {
    relay
        .and_then(RelayParameters::serving)
        .and_then(|s| s.second_channel.as_ref())
        .map_or(true, |ch| band.has_data_rate(ch.data_rate_index))
}

fn serving_channel_index(band: &Band, relay: Option<&RelayParameters>) -> bool {
    relay
        .and_then(RelayParameters::serving)
        .and_then(|s| s.default_channel_index)
        .map_or(true, |i| (i as usize) < band.relay_wor_channels.len())
}

fn factory_presets_in_band(settings: &MacSettings, plan: &FrequencyPlan, band: &Band) -> bool {
    settings.factory_preset_frequencies.iter().all(|f| match band.cf_list_type {
        CfListType::Frequencies => {
            plan.find_sub_band(*f).is_some() || band.sub_bands.iter().any(|sb| sb.contains(*f))
        }
        CfListType::ChannelMasks => band.uplink_channels.iter().any(|ch| ch.frequency == *f),
    })
}

/// Checks of MAC settings, keyed by the path relative to the settings
const SETTINGS_CHECKS: [(&str, SettingsCheck); 20] = [
    ("rx2_data_rate_index.value", |s, _, b| has_data_rate(b, s.rx2_data_rate_index)),
    ("desired_rx2_data_rate_index.value", |s, _, b| {
        has_data_rate(b, s.desired_rx2_data_rate_index)
    }),
    ("ping_slot_data_rate_index.value", |s, _, b| {
        has_data_rate(b, s.ping_slot_data_rate_index)
    }),
    ("desired_ping_slot_data_rate_index.value", |s, _, b| {
        has_data_rate(b, s.desired_ping_slot_data_rate_index)
    }),
    ("relay.mode.served.second_channel.data_rate_index", |s, _, b| {
        served_data_rate(b, s.relay.as_ref())
    }),
    ("relay.mode.serving.default_channel_index", |s, _, b| {
        serving_channel_index(b, s.relay.as_ref())
    }),
    ("relay.mode.serving.second_channel.data_rate_index", |s, _, b| {
        serving_data_rate(b, s.relay.as_ref())
    }),
    ("desired_relay.mode.served.second_channel.data_rate_index", |s, _, b| {
        served_data_rate(b, s.desired_relay.as_ref())
    }),
    ("desired_relay.mode.serving.default_channel_index", |s, _, b| {
        serving_channel_index(b, s.desired_relay.as_ref())
    }),
    ("desired_relay.mode.serving.second_channel.data_rate_index", |s, _, b| {
        serving_data_rate(b, s.desired_relay.as_ref())
    }),
    ("adr.mode.dynamic.max_data_rate_index.value", |s, _, b| {
        has_adr_data_rate(b, s.dynamic_adr().and_then(|d| d.max_data_rate_index))
    }),
    ("adr.mode.dynamic.min_data_rate_index.value", |s, _, b| {
        has_adr_data_rate(b, s.dynamic_adr().and_then(|d| d.min_data_rate_index))
    }),
    ("adr.mode.dynamic.max_tx_power_index", |s, _, b| {
        s.dynamic_adr()
            .and_then(|d| d.max_tx_power_index)
            .map_or(true, |i| i <= b.max_tx_power_index)
    }),
    ("adr.mode.dynamic.min_tx_power_index", |s, _, b| {
        s.dynamic_adr()
            .and_then(|d| d.min_tx_power_index)
            .map_or(true, |i| i <= b.max_tx_power_index)
    }),
    ("adr.mode.static.data_rate_index", |s, _, b| {
        s.static_adr().map_or(true, |st| b.has_data_rate(st.data_rate_index))
    }),
    ("adr.mode.static.tx_power_index", |s, _, b| {
        s.static_adr().map_or(true, |st| st.tx_power_index <= b.max_tx_power_index)
    }),
    ("uplink_dwell_time.value", |s, _, b| {
        s.uplink_dwell_time.is_none() || b.tx_param_setup_req_support
    }),
    ("downlink_dwell_time.value", |s, _, b| {
        s.downlink_dwell_time.is_none() || b.tx_param_setup_req_support
    }),
    ("factory_preset_frequencies", factory_presets_in_band),
    ("use_adr.value", |s, _, b| {
        !s.use_adr.map_or(false, |v| v.value) || b.supports_dynamic_adr
    }),
];

/// Class B frequency settings that fall back to the band when zero
const CLASS_B_CHECKS: [(&str, fn(&MacSettings) -> Option<Val<u64>>, fn(&Band) -> bool); 4] = [
    ("ping_slot_frequency.value", |s| s.ping_slot_frequency, |b| {
        !b.ping_slot_frequencies.is_empty()
    }),
    ("desired_ping_slot_frequency.value", |s| s.desired_ping_slot_frequency, |b| {
        !b.ping_slot_frequencies.is_empty()
    }),
    ("beacon_frequency.value", |s| s.beacon_frequency, |b| {
        !b.beacon.frequencies.is_empty()
    }),
    ("desired_beacon_frequency.value", |s| s.desired_beacon_frequency, |b| {
        !b.beacon.frequencies.is_empty()
    }),
];

fn class_b_frequency_valid(
    settings: Option<&MacSettings>,
    frequency: fn(&MacSettings) -> Option<Val<u64>>,
    band_has: fn(&Band) -> bool,
    band: &Band,
) -> bool {
    let value = settings.and_then(frequency).map_or(0, |v| v.value);
    value != 0 || band_has(band)
}

const PARAMETERS_CHECKS: [(&str, ParametersCheck); 8] = [
    ("rx2_data_rate_index", |p, b| b.has_data_rate(p.rx2_data_rate_index)),
    ("ping_slot_data_rate_index_value.value", |p, b| {
        has_data_rate(b, p.ping_slot_data_rate_index_value)
    }),
    ("relay.mode.served.second_channel.data_rate_index", |p, b| {
        served_data_rate(b, p.relay.as_ref())
    }),
    ("relay.mode.serving.default_channel_index", |p, b| {
        serving_channel_index(b, p.relay.as_ref())
    }),
    ("relay.mode.serving.second_channel.data_rate_index", |p, b| {
        serving_data_rate(b, p.relay.as_ref())
    }),
    ("adr_data_rate_index", |p, b| p.adr_data_rate_index <= b.max_adr_data_rate_index),
    ("adr_tx_power_index", |p, b| p.adr_tx_power_index <= b.max_tx_power_index),
    ("channels", |p, b| p.channels.len() <= b.max_uplink_channels),
];

const PARAMETERS_OF: [(&str, ParametersOf); 4] = [
    ("mac_state.current_parameters", |d| {
        d.mac_state.as_ref().map(|s| &s.current_parameters)
    }),
    ("mac_state.desired_parameters", |d| {
        d.mac_state.as_ref().map(|s| &s.desired_parameters)
    }),
    ("pending_mac_state.current_parameters", |d| {
        d.pending_mac_state.as_ref().map(|s| &s.current_parameters)
    }),
    ("pending_mac_state.desired_parameters", |d| {
        d.pending_mac_state.as_ref().map(|s| &s.desired_parameters)
    }),
];

fn resolve_band(bag: &FieldBag<'_>, plans: &dyn FrequencyPlanStore) -> Result<(FrequencyPlan, Band)> {
    let phy = bag
        .device("lorawan_phy_version")
        .lorawan_phy_version
        .ok_or_else(|| Error::invalid_field("lorawan_phy_version"))?;
    plans.resolve(&bag.device("frequency_plan_id").frequency_plan_id, phy)
}

fn check_band_id(bag: &FieldBag<'_>, plan: &FrequencyPlan) -> Result<()> {
    let band_id = bag
        .device("version_ids.band_id")
        .version_ids
        .as_ref()
        .map_or("", |v| v.band_id.as_str());
    if band_id.is_empty() || band_id == plan.band_id {
        return Ok(());
    }
    Err(Error::invalid_field_with_cause(
        "version_ids.band_id",
        Error::BandMismatch {
            device_band_id: band_id.to_string(),
            plan_band_id: plan.band_id.clone(),
        },
    ))
}

/// Register the band checks the set fields call for
pub fn validate_band_specifications(
    st: &mut SetDeviceState,
    plans: Arc<dyn FrequencyPlanStore>,
) -> Result<()> {
    let phy_update = st.has_set_any(["frequency_plan_id", "lorawan_phy_version"]);
    let due = |path: &FieldPath| phy_update || st.has_set_field(path);

    let settings: Vec<(FieldPath, SettingsCheck)> = SETTINGS_CHECKS
        .iter()
        .map(|(rel, check)| (FieldPath::parse(&format!("mac_settings.{}", rel)), *check))
        .filter(|(path, _)| due(path))
        .collect();

    let class_b_set = st.has_set_field("supports_class_b");
    let class_b: Vec<_> = CLASS_B_CHECKS
        .iter()
        .map(|(rel, frequency, band_has)| {
            (FieldPath::parse(&format!("mac_settings.{}", rel)), *frequency, *band_has)
        })
        .filter(|(path, _, _)| class_b_set || due(path))
        .collect();

    let mut parameters: Vec<(FieldPath, ParametersOf, ParametersCheck)> = Vec::new();
    for (prefix, of) in PARAMETERS_OF {
        for (rel, check) in PARAMETERS_CHECKS {
            let path = FieldPath::parse(&format!("{}.{}", prefix, rel));
            if due(&path) {
                parameters.push((path, of, check));
            }
        }
    }

    let dynamic_root = FieldPath::parse("mac_settings.adr.mode.dynamic");
    let mut dynamic: Vec<FieldPath> = adr_settings_fields()
        .into_iter()
        .filter(|p| dynamic_root.covers(p) && st.has_set_field(p))
        .collect();
    if phy_update {
        dynamic.push("mac_settings.adr.mode".into());
    }

    let band_id = st.has_set_any(["frequency_plan_id", "version_ids.band_id"]);

    if settings.is_empty()
        && class_b.is_empty()
        && parameters.is_empty()
        && dynamic.is_empty()
        && !band_id
    {
        return Ok(());
    }

    let mut deps: Vec<FieldPath> = vec!["frequency_plan_id".into(), "lorawan_phy_version".into()];
    deps.extend(settings.iter().map(|(p, _)| p.clone()));
    deps.extend(class_b.iter().map(|(p, _, _)| p.clone()));
    deps.extend(parameters.iter().map(|(p, _, _)| p.clone()));
    deps.extend(dynamic.iter().cloned());
    if !class_b.is_empty() {
        deps.push("supports_class_b".into());
    }
    if band_id {
        deps.push("version_ids.band_id".into());
    }

    st.with_fields(deps, move |bag| {
        let (plan, band) = resolve_band(bag, &*plans)?;
        if band_id {
            check_band_id(bag, &plan)?;
        }
        for (path, check) in &settings {
            if let Some(s) = bag.device(path).mac_settings.as_ref() {
                if !check(s, &plan, &band) {
                    return Err(Error::invalid_field(path));
                }
            }
        }
        if !band.supports_dynamic_adr {
            let with_dynamic = dynamic.iter().find(|path| {
                bag.device(*path)
                    .mac_settings
                    .as_ref()
                    .and_then(MacSettings::dynamic_adr)
                    .is_some()
            });
            if let Some(path) = with_dynamic {
                return Err(Error::invalid_field(path));
            }
        }
        if !class_b.is_empty() && bag.device("supports_class_b").supports_class_b {
            for (path, frequency, band_has) in &class_b {
                let settings = bag.device(path).mac_settings.as_ref();
                if !class_b_frequency_valid(settings, *frequency, *band_has, &band) {
                    return Err(Error::invalid_field(path));
                }
            }
        }
        for (path, of, check) in &parameters {
            if let Some(params) = of(bag.device(path)) {
                if !check(params, &band) {
                    return Err(Error::invalid_field(path));
                }
            }
        }
        Ok(())
    })
}

/// Register the band checks of a referenced MAC settings profile
///
/// Failures name the profile path, `mac_settings_profile.mac_settings.*`,
/// except for ADR bounds which name the device settings path they govern.
pub fn validate_profile(
    st: &mut SetDeviceState,
    profile: &MacSettingsProfile,
    plans: Arc<dyn FrequencyPlanStore>,
) -> Result<()> {
    let Some(settings) = profile.mac_settings.clone() else {
        return Ok(());
    };
    st.with_fields(
        ["frequency_plan_id", "lorawan_phy_version", "supports_class_b"],
        move |bag| {
            let (plan, band) = resolve_band(bag, &*plans)?;
            let prefixed = |rel: &str| format!("mac_settings_profile.mac_settings.{}", rel);
            for (rel, check) in SETTINGS_CHECKS {
                if !check(&settings, &plan, &band) {
                    return Err(Error::invalid_field(prefixed(rel)));
                }
            }
            if let Some(dynamic) = settings.dynamic_adr() {
                if !band.supports_dynamic_adr {
                    return Err(Error::invalid_field(prefixed("adr.mode.dynamic")));
                }
                if let Some(path) = dynamic_bounds_violation(&|_| Some(dynamic)) {
                    return Err(Error::invalid_field(path));
                }
            }
            if bag.device("supports_class_b").supports_class_b {
                for (rel, frequency, band_has) in CLASS_B_CHECKS {
                    if !class_b_frequency_valid(Some(&settings), frequency, band_has, &band) {
                        return Err(Error::invalid_field(prefixed(rel)));
                    }
                }
            }
            Ok(())
        },
    )
}

const DYNAMIC_PREFIX: &str = "mac_settings.adr.mode.dynamic";

fn bound(lo: Option<u32>, hi: Option<u32>, max_rel: &str) -> Option<FieldPath> {
    match (lo, hi) {
        (Some(lo), Some(hi)) if hi < lo => {
            Some(FieldPath::parse(&format!("{}.{}", DYNAMIC_PREFIX, max_rel)))
        }
        _ => None,
    }
}

/// First dynamic ADR upper bound below its lower bound
///
/// `source` maps a path relative to the dynamic ADR settings to the
/// settings holding it.
fn dynamic_bounds_violation<'a>(
    source: &dyn Fn(&str) -> Option<&'a DynamicAdr>,
) -> Option<FieldPath> {
    let check = |min_rel: &str,
                 max_rel: &str,
                 min: fn(&DynamicAdr) -> Option<u32>,
                 max: fn(&DynamicAdr) -> Option<u32>| {
        bound(source(min_rel).and_then(min), source(max_rel).and_then(max), max_rel)
    };
    check(
        "min_data_rate_index.value",
        "max_data_rate_index.value",
        |d| d.min_data_rate_index.map(|v| v.value),
        |d| d.max_data_rate_index.map(|v| v.value),
    )
    .or_else(|| {
        check(
            "min_tx_power_index",
            "max_tx_power_index",
            |d| d.min_tx_power_index,
            |d| d.max_tx_power_index,
        )
    })
    .or_else(|| check("min_nb_trans", "max_nb_trans", |d| d.min_nb_trans, |d| d.max_nb_trans))
    .or_else(|| {
        (0..ADR_OVERRIDE_COUNT).find_map(|i| {
            let min_rel = format!("overrides.data_rate_{}.min_nb_trans", i);
            let max_rel = format!("overrides.data_rate_{}.max_nb_trans", i);
            let at = |d: &'a DynamicAdr| d.overrides.as_ref()?.get(i);
            bound(
                source(&min_rel).and_then(at).and_then(|o| o.min_nb_trans),
                source(&max_rel).and_then(at).and_then(|o| o.max_nb_trans),
                &max_rel,
            )
        })
    })
}

fn dynamic_adr(dev: &EndDevice) -> Option<&DynamicAdr> {
    dev.mac_settings.as_ref()?.dynamic_adr()
}

/// Reject dynamic ADR upper bounds below their lower bounds
pub fn validate_adr_dynamic_parameters(st: &mut SetDeviceState) -> Result<()> {
    let mut paths: Vec<String> = [
        "max_data_rate_index.value",
        "min_data_rate_index.value",
        "max_tx_power_index",
        "min_tx_power_index",
        "max_nb_trans",
        "min_nb_trans",
    ]
    .iter()
    .map(|rel| format!("{}.{}", DYNAMIC_PREFIX, rel))
    .collect();
    for i in 0..ADR_OVERRIDE_COUNT {
        for rel in ["max_nb_trans", "min_nb_trans"] {
            paths.push(format!("{}.overrides.data_rate_{}.{}", DYNAMIC_PREFIX, i, rel));
        }
    }
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();

    st.validate_set_fields(&refs, |bag| {
        dynamic_bounds_violation(&|rel| {
            dynamic_adr(bag.device(format!("{}.{}", DYNAMIC_PREFIX, rel)))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mac_settings::{AdrMode, AdrSettings, StaticAdr};
    use crate::device::EndDeviceIdentifiers;
    use crate::lorawan::phy::PhyVersion;
    use crate::lorawan::region::StaticPlanStore;
    use crate::path::PathSet;

    fn plans() -> Arc<dyn FrequencyPlanStore> {
        Arc::new(StaticPlanStore::with_builtin())
    }

    fn device(plan: &str) -> EndDevice {
        let mut dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        dev.frequency_plan_id = plan.into();
        dev.lorawan_phy_version = Some(PhyVersion::Rp001V1_0_3RevA);
        dev
    }

    fn with_settings(mut dev: EndDevice, f: impl FnOnce(&mut MacSettings)) -> EndDevice {
        f(dev.mac_settings.get_or_insert_with(Default::default));
        dev
    }

    fn validate(dev: EndDevice, paths: &[&str]) -> Result<()> {
        let mut st = SetDeviceState::new(dev, PathSet::from_strs(paths));
        validate_band_specifications(&mut st, plans())?;
        st.apply(None, |_, _, _| Ok(())).map(|_| ())
    }

    #[test]
    fn test_unknown_rx2_data_rate() {
        let dev = with_settings(device("US_902_928_FSB_2"), |s| {
            s.rx2_data_rate_index = Val::some(5);
        });
        let err = validate(
            dev.clone(),
            &["frequency_plan_id", "lorawan_phy_version", "mac_settings.rx2_data_rate_index.value"],
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("mac_settings.rx2_data_rate_index.value"));

        let dev = with_settings(dev, |s| s.rx2_data_rate_index = Val::some(8));
        assert!(validate(
            dev,
            &["frequency_plan_id", "lorawan_phy_version", "mac_settings.rx2_data_rate_index.value"],
        )
        .is_ok());
    }

    #[test]
    fn test_static_adr_tx_power() {
        let dev = with_settings(device("EU_863_870"), |s| {
            s.adr = Some(AdrSettings {
                mode: Some(AdrMode {
                    static_mode: Some(StaticAdr {
                        data_rate_index: 5,
                        tx_power_index: 9,
                        nb_trans: 1,
                    }),
                    ..Default::default()
                }),
            });
        });
        let err = validate(
            dev,
            &["frequency_plan_id", "lorawan_phy_version", "mac_settings.adr.mode.static"],
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("mac_settings.adr.mode.static.tx_power_index"));
    }

    #[test]
    fn test_dwell_time_requires_tx_param_setup() {
        let dev = with_settings(device("EU_863_870"), |s| {
            s.uplink_dwell_time = Val::some(true);
        });
        let paths = ["frequency_plan_id", "lorawan_phy_version", "mac_settings.uplink_dwell_time"];
        assert_eq!(
            validate(dev, &paths).unwrap_err().field(),
            Some("mac_settings.uplink_dwell_time.value")
        );

        let dev = with_settings(device("AS_923"), |s| s.uplink_dwell_time = Val::some(true));
        assert!(validate(dev, &paths).is_ok());
    }

    #[test]
    fn test_factory_presets_outside_band() {
        let dev = with_settings(device("EU_863_870"), |s| {
            s.factory_preset_frequencies = vec![868_100_000, 915_000_000];
        });
        let paths = [
            "frequency_plan_id",
            "lorawan_phy_version",
            "mac_settings.factory_preset_frequencies",
        ];
        assert_eq!(
            validate(dev, &paths).unwrap_err().field(),
            Some("mac_settings.factory_preset_frequencies")
        );
    }

    #[test]
    fn test_class_b_needs_ping_slot_frequency_on_hopping_band() {
        let mut dev = device("US_902_928_FSB_2");
        dev.supports_class_b = true;
        let paths = ["frequency_plan_id", "lorawan_phy_version", "supports_class_b"];
        assert_eq!(
            validate(dev.clone(), &paths).unwrap_err().field(),
            Some("mac_settings.ping_slot_frequency.value")
        );

        let dev = with_settings(dev, |s| {
            s.ping_slot_frequency = Val::some(923_300_000);
            s.desired_ping_slot_frequency = Val::some(923_300_000);
        });
        assert!(validate(dev, &paths).is_ok());
    }

    #[test]
    fn test_band_id_mismatch() {
        let mut dev = device("EU_863_870");
        dev.version_ids = Some(crate::device::ids::EndDeviceVersionIdentifiers {
            band_id: "US_902_928".into(),
            ..Default::default()
        });
        let err = validate(dev, &["frequency_plan_id", "lorawan_phy_version", "version_ids"])
            .unwrap_err();
        assert_eq!(err.field(), Some("version_ids.band_id"));
    }

    #[test]
    fn test_checks_defer_to_stored_plan() {
        let dev = with_settings(EndDevice::new(EndDeviceIdentifiers::new("app", "dev")), |s| {
            s.rx2_data_rate_index = Val::some(5);
        });
        let mut st = SetDeviceState::new(
            dev,
            PathSet::from_strs(&["mac_settings.rx2_data_rate_index.value"]),
        );
        validate_band_specifications(&mut st, plans()).unwrap();
        assert!(st.has_get_field("frequency_plan_id"));

        assert!(st.apply(Some(&device("EU_863_870")), |_, _, _| Ok(())).is_ok());
        assert!(st
            .apply(Some(&device("US_902_928_FSB_2")), |_, _, _| Ok(()))
            .is_err());
    }

    #[test]
    fn test_mac_state_channel_count() {
        let mut dev = device("EU_863_870");
        let mut mac_state = crate::device::MacState::default();
        mac_state.current_parameters.channels = vec![Default::default(); 17];
        dev.mac_state = Some(mac_state);
        let err = validate(dev, &["frequency_plan_id", "lorawan_phy_version", "mac_state"])
            .unwrap_err();
        assert_eq!(err.field(), Some("mac_state.current_parameters.channels"));
    }

    #[test]
    fn test_dynamic_bounds() {
        let dev = with_settings(device("EU_863_870"), |s| {
            let mut dynamic = DynamicAdr {
                min_nb_trans: Some(2),
                max_nb_trans: Some(3),
                ..Default::default()
            };
            let mut overrides = crate::device::mac_settings::AdrOverrides::default();
            overrides.set(
                4,
                crate::device::mac_settings::AdrOverride {
                    min_nb_trans: Some(3),
                    max_nb_trans: Some(1),
                },
            );
            dynamic.overrides = Some(overrides);
            s.adr = Some(AdrSettings {
                mode: Some(AdrMode {
                    dynamic: Some(dynamic),
                    ..Default::default()
                }),
            });
        });
        let mut st = SetDeviceState::new(
            dev,
            PathSet::from_strs(&["mac_settings.adr.mode.dynamic"]),
        );
        let err = validate_adr_dynamic_parameters(&mut st).unwrap_err();
        assert_eq!(
            err.field(),
            Some("mac_settings.adr.mode.dynamic.overrides.data_rate_4.max_nb_trans")
        );
    }

    #[test]
    fn test_profile_paths() {
        let profile = MacSettingsProfile {
            mac_settings: Some(MacSettings {
                desired_rx2_data_rate_index: Val::some(14),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut st = SetDeviceState::new(
            device("EU_863_870"),
            PathSet::from_strs(&["frequency_plan_id", "lorawan_phy_version", "supports_class_b"]),
        );
        let err = validate_profile(&mut st, &profile, plans()).unwrap_err();
        assert_eq!(
            err.field(),
            Some("mac_settings_profile.mac_settings.desired_rx2_data_rate_index.value")
        );
    }
}
