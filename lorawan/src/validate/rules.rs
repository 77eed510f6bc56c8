//! Declarative implication rules between device fields
//!
//! A [`Rule`] states that when its antecedent field is zero (or not zero),
//! a list of fields must be zero, not zero, or satisfy a check. Rules are
//! enforced in both directions: setting a consequent field to a value that
//! would violate the rule constrains the antecedent instead.

use std::iter;
use std::sync::Arc;

use crate::device::mac_settings::ADR_OVERRIDE_COUNT;
use crate::device::mac_state::MAC_PARAMETER_FIELDS;
use crate::error::Result;
use crate::mask;
use crate::path::FieldPath;
use crate::state::{FieldBag, SetDeviceState};

use super::{mac_parameter_leaves, prefixed, relay_leaves};

/// Zero-ness of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Field is zero
    Zero,
    /// Field is not zero
    NotZero,
}

impl Condition {
    fn holds(self, is_zero: bool) -> bool {
        match self {
            Condition::Zero => is_zero,
            Condition::NotZero => !is_zero,
        }
    }

    fn negate(self) -> Self {
        match self {
            Condition::Zero => Condition::NotZero,
            Condition::NotZero => Condition::Zero,
        }
    }

    fn expect(self, st: &mut SetDeviceState, path: &FieldPath) -> Result<()> {
        match self {
            Condition::Zero => st.validate_field_is_zero(path),
            Condition::NotZero => st.validate_field_is_not_zero(path),
        }
    }
}

/// Check over several fields, returning the violating path
pub type CheckFn = Arc<dyn Fn(&FieldBag<'_>) -> Option<FieldPath> + Send + Sync>;

/// Check of a rule consequent
#[derive(Clone)]
pub struct FieldCheck {
    /// Fields the check reads
    pub fields: Vec<FieldPath>,
    /// Returns the violating path, if any
    pub check: CheckFn,
}

impl FieldCheck {
    fn new<F>(fields: &[&str], check: F) -> Self
    where
        F: Fn(&FieldBag<'_>) -> Option<FieldPath> + Send + Sync + 'static,
    {
        Self {
            fields: fields.iter().map(|f| FieldPath::parse(f)).collect(),
            check: Arc::new(check),
        }
    }
}

/// What a rule requires once its antecedent holds
#[derive(Clone)]
pub enum Then {
    /// Every field must match the condition
    Fields(Condition, Vec<FieldPath>),
    /// Every check must pass
    Checks(Vec<FieldCheck>),
}

/// Implication rule
#[derive(Clone)]
pub struct Rule {
    /// Antecedent field
    pub left: FieldPath,
    /// Condition on the antecedent
    pub when: Condition,
    /// Consequent
    pub then: Then,
}

impl Rule {
    fn fields(left: &str, when: Condition, then: Condition, right: Vec<FieldPath>) -> Self {
        Self {
            left: left.into(),
            when,
            then: Then::Fields(then, right),
        }
    }

    fn checks(left: &str, when: Condition, checks: Vec<FieldCheck>) -> Self {
        Self {
            left: left.into(),
            when,
            then: Then::Checks(checks),
        }
    }

    /// Register the checks of the rule with `st`
    pub fn validate(&self, st: &mut SetDeviceState) -> Result<()> {
        match &self.then {
            Then::Fields(then, right) => {
                if st.has_set_field(&self.left) {
                    if !self.when.holds(st.field_is_zero(&self.left)?) {
                        return Ok(());
                    }
                    for r in right {
                        then.expect(st, r)?;
                    }
                }
                for r in right {
                    if !st.has_set_field(r) || then.holds(st.field_is_zero(r)?) {
                        continue;
                    }
                    self.when.negate().expect(st, &self.left)?;
                }
            }
            Then::Checks(checks) => {
                for check in checks {
                    self.validate_check(st, check)?;
                }
            }
        }
        Ok(())
    }

    fn validate_check(&self, st: &mut SetDeviceState, check: &FieldCheck) -> Result<()> {
        if st.has_set_field(&self.left) {
            if !self.when.holds(st.field_is_zero(&self.left)?) {
                return Ok(());
            }
            let f = check.check.clone();
            st.validate_fields(check.fields.iter(), move |bag| f(bag))?;
        }
        if !st.has_set_any(check.fields.iter()) {
            return Ok(());
        }
        let (left, when, f) = (self.left.clone(), self.when, check.check.clone());
        st.validate_fields(
            iter::once(&self.left).chain(check.fields.iter()),
            move |bag| {
                if !when.holds(bag.is_zero(&left)) {
                    return None;
                }
                f(bag)
            },
        )
    }
}

/// Register every rule of `rules` with `st`
pub fn validate_rules(st: &mut SetDeviceState, rules: &[Rule]) -> Result<()> {
    rules.iter().try_for_each(|rule| rule.validate(st))
}

fn class_b_ping_slot_periodicity() -> FieldCheck {
    FieldCheck::new(
        &["mac_settings.ping_slot_periodicity.value", "supports_class_b"],
        |bag| {
            let periodicity = bag
                .device("mac_settings.ping_slot_periodicity.value")
                .mac_settings
                .as_ref()
                .and_then(|s| s.ping_slot_periodicity);
            if !bag.device("supports_class_b").supports_class_b || periodicity.is_some() {
                return None;
            }
            Some("mac_settings.ping_slot_periodicity.value".into())
        },
    )
}

/// Rules tied to over-the-air activation
pub fn otaa_rules() -> Vec<Rule> {
    let mut pending: Vec<FieldPath> = Vec::new();
    pending.extend(mac_parameter_leaves("pending_mac_state.current_parameters"));
    pending.extend(mac_parameter_leaves("pending_mac_state.desired_parameters"));
    pending.extend(prefixed(
        "pending_mac_state",
        &[
            "device_class",
            "last_adr_change_f_cnt_up",
            "last_confirmed_downlink_at",
            "last_dev_status_f_cnt_up",
            "last_downlink_at",
            "last_network_initiated_downlink_at",
            "lorawan_version",
            "pending_join_request.cf_list.ch_masks",
            "pending_join_request.cf_list.freq",
            "pending_join_request.downlink_settings.opt_neg",
            "pending_join_request.downlink_settings.rx1_dr_offset",
            "pending_join_request.downlink_settings.rx2_dr",
            "pending_join_request.rx1_delay",
            "ping_slot_periodicity.value",
            "queued_join_accept.correlation_ids",
            "queued_join_accept.keys.app_s_key.encrypted_key",
            "queued_join_accept.keys.app_s_key.kek_label",
            "queued_join_accept.keys.app_s_key.key",
            "queued_join_accept.keys.f_nwk_s_int_key.key",
            "queued_join_accept.keys.nwk_s_enc_key.key",
            "queued_join_accept.keys.s_nwk_s_int_key.key",
            "queued_join_accept.keys.session_key_id",
            "queued_join_accept.payload",
            "queued_join_accept.request.cf_list.ch_masks",
            "queued_join_accept.request.cf_list.freq",
            "queued_join_accept.request.dev_addr",
            "queued_join_accept.request.downlink_settings.opt_neg",
            "queued_join_accept.request.downlink_settings.rx1_dr_offset",
            "queued_join_accept.request.downlink_settings.rx2_dr",
            "queued_join_accept.request.net_id",
            "queued_join_accept.request.rx1_delay",
            "recent_downlinks",
            "recent_mac_command_identifiers",
            "recent_uplinks",
            "rejected_adr_data_rate_indexes",
            "rejected_adr_tx_power_indexes",
            "rejected_data_rate_ranges",
            "rejected_frequencies",
            "rx_windows_available",
        ],
    ));
    pending.extend(prefixed(
        "pending_session",
        &[
            "dev_addr",
            "keys.f_nwk_s_int_key.key",
            "keys.nwk_s_enc_key.key",
            "keys.s_nwk_s_int_key.key",
            "keys.session_key_id",
        ],
    ));
    pending.push("session.keys.session_key_id".into());

    let abp_dev_eui = FieldCheck::new(&["ids.dev_eui", "lorawan_version", "multicast"], |bag| {
        if bag.device("ids.dev_eui").ids.dev_eui.map_or(false, |eui| !eui.is_zero()) {
            return None;
        }
        match bag.device("lorawan_version").lorawan_version {
            None => Some("lorawan_version".into()),
            Some(v) if v.requires_dev_eui_for_abp() && !bag.device("multicast").multicast => {
                Some("ids.dev_eui".into())
            }
            Some(_) => None,
        }
    });

    vec![
        Rule::fields("supports_join", Condition::Zero, Condition::Zero, pending),
        Rule::fields(
            "supports_join",
            Condition::Zero,
            Condition::NotZero,
            prefixed("session", &["dev_addr", "keys.f_nwk_s_int_key.key"]),
        ),
        Rule::checks(
            "supports_join",
            Condition::Zero,
            vec![abp_dev_eui, class_b_ping_slot_periodicity()],
        ),
        Rule::fields(
            "supports_join",
            Condition::NotZero,
            Condition::NotZero,
            prefixed("ids", &["dev_eui", "join_eui"]),
        ),
    ]
}

/// Rules tied to multicast groups
pub fn multicast_rules() -> Vec<Rule> {
    let mut forbidden: Vec<FieldPath> = Vec::new();
    forbidden.extend(relay_leaves("mac_settings.desired_relay"));
    forbidden.extend(relay_leaves("mac_settings.relay"));
    forbidden.push("mac_settings.schedule_downlinks.value".into());
    forbidden.extend(relay_leaves("mac_state.current_parameters.relay"));
    forbidden.extend(relay_leaves("mac_state.desired_parameters.relay"));
    forbidden.extend(prefixed(
        "mac_state",
        &[
            "last_adr_change_f_cnt_up",
            "last_confirmed_downlink_at",
            "last_dev_status_f_cnt_up",
            "pending_application_downlink",
            "pending_requests",
            "queued_responses",
            "recent_mac_command_identifiers",
            "recent_uplinks",
            "rejected_adr_data_rate_indexes",
            "rejected_adr_tx_power_indexes",
            "rejected_data_rate_ranges",
            "rejected_frequencies",
            "rx_windows_available",
        ],
    ));
    forbidden.extend(prefixed("session", &["last_conf_f_cnt_down", "last_f_cnt_up"]));
    forbidden.push("supports_join".into());

    let mut checks: Vec<FieldCheck> = MAC_PARAMETER_FIELDS
        .iter()
        .filter(|name| **name != "relay")
        .map(|name| {
            let current = FieldPath::parse(&format!("mac_state.current_parameters.{}", name));
            let desired = FieldPath::parse(&format!("mac_state.desired_parameters.{}", name));
            FieldCheck {
                fields: vec![current.clone(), desired.clone()],
                check: Arc::new(move |bag| {
                    if mask::values_equal(bag.value(&current), bag.value(&desired)) {
                        None
                    } else {
                        Some(desired.clone())
                    }
                }),
            }
        })
        .collect();
    checks.push(FieldCheck::new(&["supports_class_b", "supports_class_c"], |bag| {
        if bag.device("supports_class_b").supports_class_b
            || bag.device("supports_class_c").supports_class_c
        {
            None
        } else {
            Some("supports_class_b".into())
        }
    }));
    checks.push(class_b_ping_slot_periodicity());

    vec![
        Rule::fields("multicast", Condition::NotZero, Condition::Zero, forbidden),
        Rule::checks("multicast", Condition::NotZero, checks),
    ]
}

/// ADR mode paths that supersede the legacy ADR fields
pub fn adr_settings_fields() -> Vec<FieldPath> {
    let mut fields = prefixed(
        "mac_settings",
        &[
            "adr",
            "adr.mode",
            "adr.mode.disabled",
            "adr.mode.dynamic",
            "adr.mode.dynamic.channel_steering",
            "adr.mode.dynamic.channel_steering.mode",
            "adr.mode.dynamic.channel_steering.mode.disabled",
            "adr.mode.dynamic.channel_steering.mode.lora_narrow",
            "adr.mode.dynamic.margin",
            "adr.mode.dynamic.max_data_rate_index",
            "adr.mode.dynamic.max_data_rate_index.value",
            "adr.mode.dynamic.max_nb_trans",
            "adr.mode.dynamic.max_tx_power_index",
            "adr.mode.dynamic.min_data_rate_index",
            "adr.mode.dynamic.min_data_rate_index.value",
            "adr.mode.dynamic.min_nb_trans",
            "adr.mode.dynamic.min_tx_power_index",
            "adr.mode.dynamic.overrides",
            "adr.mode.static",
            "adr.mode.static.data_rate_index",
            "adr.mode.static.nb_trans",
            "adr.mode.static.tx_power_index",
        ],
    );
    for i in 0..ADR_OVERRIDE_COUNT {
        let base = format!("mac_settings.adr.mode.dynamic.overrides.data_rate_{}", i);
        fields.push(FieldPath::parse(&base));
        fields.push(FieldPath::parse(&format!("{}.max_nb_trans", base)));
        fields.push(FieldPath::parse(&format!("{}.min_nb_trans", base)));
    }
    fields
}

const LEGACY_ADR_FIELDS: &[&str] = &[
    "mac_settings.adr_margin",
    "mac_settings.use_adr",
    "mac_settings.use_adr.value",
];

/// Rules keeping ADR mode settings and the legacy ADR fields apart
pub fn adr_rules() -> Vec<Rule> {
    let legacy: Vec<FieldPath> = LEGACY_ADR_FIELDS.iter().map(|f| FieldPath::parse(f)).collect();
    let modern = adr_settings_fields().into_iter().map(|field| Rule {
        left: field,
        when: Condition::NotZero,
        then: Then::Fields(Condition::Zero, legacy.clone()),
    });
    let old = LEGACY_ADR_FIELDS.iter().map(|field| {
        Rule::fields(
            field,
            Condition::NotZero,
            Condition::Zero,
            vec!["mac_settings.adr".into()],
        )
    });
    modern.chain(old).collect()
}

/// Every implication rule enforced on Set
///
/// Rules are ordered by antecedent condition, zero antecedents first.
pub fn build_validation_rules() -> Vec<Rule> {
    let mut rules: Vec<Rule> = otaa_rules()
        .into_iter()
        .chain(multicast_rules())
        .chain(adr_rules())
        .collect();
    rules.sort_by_key(|rule| match (&rule.when, &rule.then) {
        (Condition::Zero, Then::Fields(Condition::Zero, _)) => 0,
        (Condition::Zero, Then::Fields(Condition::NotZero, _)) => 1,
        (Condition::Zero, Then::Checks(_)) => 2,
        (Condition::NotZero, Then::Fields(Condition::Zero, _)) => 3,
        (Condition::NotZero, Then::Fields(Condition::NotZero, _)) => 4,
        (Condition::NotZero, Then::Checks(_)) => 5,
    });
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EndDevice, EndDeviceIdentifiers};
    use crate::error::Error;
    use crate::lorawan::mac::MacVersion;
    use crate::path::PathSet;

    fn state(dev: EndDevice, paths: &[&str]) -> SetDeviceState {
        SetDeviceState::new(dev, PathSet::from_strs(paths))
    }

    #[test]
    fn test_rules_are_stably_ordered() {
        let rules = build_validation_rules();
        let first = &rules[0];
        assert_eq!(first.left, FieldPath::parse("supports_join"));
        assert_eq!(first.when, Condition::Zero);
        assert!(rules
            .windows(2)
            .all(|w| !(w[0].when == Condition::NotZero && w[1].when == Condition::Zero)));
    }

    #[test]
    fn test_abp_requires_dev_eui() {
        let mut dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        dev.lorawan_version = Some(MacVersion::V1_0_4);
        let mut st = state(dev, &["supports_join", "lorawan_version", "ids.dev_eui", "multicast"]);
        let err = validate_rules(&mut st, &otaa_rules()).unwrap_err();
        assert_eq!(err.field(), Some("ids.dev_eui"));
    }

    #[test]
    fn test_abp_unknown_version() {
        let dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        let mut st = state(dev, &["supports_join", "lorawan_version", "ids.dev_eui", "multicast"]);
        let err = validate_rules(&mut st, &otaa_rules()).unwrap_err();
        assert_eq!(err.field(), Some("lorawan_version"));
    }

    #[test]
    fn test_reverse_direction_defers_to_stored() {
        let mut dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        dev.mac_settings = Some(Default::default());
        dev.mac_settings.as_mut().unwrap().use_adr = crate::device::Val::some(true);
        let mut st = state(dev, &["mac_settings.use_adr.value"]);
        validate_rules(&mut st, &adr_rules()).unwrap();
        assert!(st.has_get_field("mac_settings.adr"));

        let mut stored = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        stored.mac_settings = Some(Default::default());
        stored.mac_settings.as_mut().unwrap().adr = Some(Default::default());
        assert!(matches!(
            st.apply(Some(&stored), |_, _, _| Ok(())),
            Err(Error::InvalidFieldValue { field, .. }) if field == "mac_settings.adr"
        ));
        assert!(st.apply(None, |_, _, _| Ok(())).is_ok());
    }

    #[test]
    fn test_multicast_parameters_must_match() {
        let mut dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
        dev.multicast = true;
        dev.supports_class_c = true;
        let mut mac_state = crate::device::MacState::default();
        mac_state.current_parameters.rx1_delay = 1;
        mac_state.desired_parameters.rx1_delay = 5;
        dev.mac_state = Some(mac_state);
        let mut st = state(dev, &["multicast", "supports_class_b", "supports_class_c", "mac_state"]);
        let err = validate_rules(&mut st, &multicast_rules()).unwrap_err();
        assert_eq!(err.field(), Some("mac_state.desired_parameters.rx1_delay"));
    }
}
