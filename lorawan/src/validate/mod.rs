//! Invariant validation of Set requests
//!
//! Validators never read storage themselves. They register checks with the
//! [`SetDeviceState`] of the call, which runs each check as soon as every
//! field it reads is known:
//! - [`rules`] holds the implication rules between fields
//! - [`band`] checks values against the band and frequency plan
//! - [`session`] checks session, MAC state and key envelope consistency

use crate::device::mac_state::MAC_PARAMETER_FIELDS;
use crate::device::relay::RELAY_LEAVES;
use crate::error::Result;
use crate::path::FieldPath;
use crate::state::SetDeviceState;

/// Band and frequency plan checks
pub mod band;

/// Implication rules between fields
pub mod rules;

/// Session and key consistency checks
pub mod session;

pub use band::{validate_adr_dynamic_parameters, validate_band_specifications, validate_profile};
pub use rules::{build_validation_rules, validate_rules, Rule};
pub use session::{
    validate_pending_session, validate_session, validate_session_keys, SessionFlags,
};

/// `{prefix}.{leaf}` for every leaf
pub fn prefixed(prefix: &str, leaves: &[&str]) -> Vec<FieldPath> {
    let prefix = FieldPath::parse(prefix);
    leaves
        .iter()
        .map(|leaf| FieldPath::parse(&format!("{}.{}", prefix, leaf)))
        .collect()
}

/// Relay leaf paths under the relay field at `prefix`
pub fn relay_leaves(prefix: &str) -> Vec<FieldPath> {
    prefixed(prefix, RELAY_LEAVES)
}

/// MAC parameter leaf paths under `prefix`, relay leaves expanded
pub fn mac_parameter_leaves(prefix: &str) -> Vec<FieldPath> {
    let mut out = Vec::with_capacity(MAC_PARAMETER_FIELDS.len() + RELAY_LEAVES.len());
    for name in MAC_PARAMETER_FIELDS {
        if *name == "relay" {
            out.extend(relay_leaves(&format!("{}.relay", prefix)));
        } else {
            out.push(FieldPath::parse(&format!("{}.{}", prefix, name)));
        }
    }
    out
}

const MAC_STATE_LEAVES: &[&str] = &[
    "device_class",
    "last_adr_change_f_cnt_up",
    "last_confirmed_downlink_at",
    "last_dev_status_f_cnt_up",
    "last_downlink_at",
    "last_network_initiated_downlink_at",
    "lorawan_version",
    "pending_application_downlink",
    "pending_requests",
    "ping_slot_periodicity.value",
    "queued_responses",
    "recent_downlinks",
    "recent_mac_command_identifiers",
    "recent_uplinks",
    "rejected_adr_data_rate_indexes",
    "rejected_adr_tx_power_indexes",
    "rejected_data_rate_ranges",
    "rejected_frequencies",
    "rx_windows_available",
];

/// Leaf paths of the MAC state at `prefix`, excluding join negotiation
pub fn mac_state_leaves(prefix: &str) -> Vec<FieldPath> {
    let mut out = mac_parameter_leaves(&format!("{}.current_parameters", prefix));
    out.extend(mac_parameter_leaves(&format!("{}.desired_parameters", prefix)));
    out.extend(prefixed(prefix, MAC_STATE_LEAVES));
    out
}

/// Identifier paths the registry always writes
pub const IMPLICIT_SET_PATHS: &[&str] = &["ids.application_ids", "ids.device_id"];

/// Add the identifier paths a Set call always writes
pub fn add_implicit_set_paths(st: &mut SetDeviceState) {
    st.add_set_fields(IMPLICIT_SET_PATHS.iter().copied());
    let ids = st.device().ids.clone();
    if ids.join_eui.is_some() {
        st.add_set_fields(["ids.join_eui"]);
    }
    if ids.dev_eui.is_some() {
        st.add_set_fields(["ids.dev_eui"]);
    }
    if ids.dev_addr.is_some() {
        st.add_set_fields(["ids.dev_addr"]);
    }
}

/// Reject empty frequency plans and unknown versions among set fields
///
/// A MAC state written as a whole may be absent; a present one needs a known version.
pub fn validate_versions(st: &SetDeviceState) -> Result<()> {
    let dev = st.device();
    st.validate_set_field("frequency_plan_id", || !dev.frequency_plan_id.is_empty())?;
    st.validate_set_field("lorawan_phy_version", || dev.lorawan_phy_version.is_some())?;
    st.validate_set_field("lorawan_version", || dev.lorawan_version.is_some())?;
    st.validate_set_field("mac_state.lorawan_version", || {
        dev.mac_state.as_ref().map_or(true, |s| s.lorawan_version.is_some())
    })?;
    st.validate_set_field("pending_mac_state.lorawan_version", || {
        dev.pending_mac_state
            .as_ref()
            .map_or(true, |s| s.lorawan_version.is_some())
    })
}

/// Keep `ids.dev_addr` and `session.dev_addr` in agreement
///
/// When `ids.dev_addr` is set, the effective session must carry the same
/// address, or be absent when the address is cleared. When only
/// `session.dev_addr` is set, `ids.dev_addr` follows it.
pub fn validate_dev_addr(st: &mut SetDeviceState) -> Result<()> {
    if st.has_set_field("ids.dev_addr") {
        let dev_addr = st.device().ids.dev_addr.filter(|addr| !addr.is_zero());
        return st.validate_field("session.dev_addr", move |dev| match (&dev_addr, &dev.session) {
            (None, session) => session.is_none(),
            (Some(addr), Some(session)) => session.dev_addr.as_ref() == Some(addr),
            (Some(_), None) => false,
        });
    }
    if st.has_set_field("session.dev_addr") {
        let dev_addr = st
            .device()
            .session
            .as_ref()
            .and_then(|s| s.dev_addr)
            .filter(|addr| !addr.is_zero());
        st.device_mut().ids.dev_addr = dev_addr;
        st.add_set_fields(["ids.dev_addr"]);
    }
    Ok(())
}
