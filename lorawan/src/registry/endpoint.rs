//! End device registry calls
//!
//! A Set call runs in three phases:
//! 1. checks that only need the request run at once, the others are
//!    registered with the [`SetDeviceState`] of the call
//! 2. plaintext session keys are wrapped before the transaction starts
//! 3. inside the transaction the registered checks run against the stored
//!    record, derived fields are filled in and the record is written
//!
//! Reads only return plaintext keys the caller asked for by path.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use super::{log_registry_error, DeviceStore, ProfileStore};
use crate::config::Config;
use crate::crypto::{unwrap_selected_session_keys, KeyVault, SESSION_KEY_NAMES};
use crate::device::ids::MacSettingsProfileIdentifiers;
use crate::device::{
    EndDevice, EndDeviceIdentifiers, MacSettings, MacSettingsProfile, MacState, PowerState,
    Session,
};
use crate::error::{Error, Result};
use crate::events::{
    Event, EventPublisher, EVT_BATCH_DELETE_END_DEVICES, EVT_CREATE_END_DEVICE,
    EVT_DELETE_END_DEVICE,
};
use crate::lorawan::mac::{DefaultMacStateBuilder, MacStateBuilder, MacVersion};
use crate::lorawan::region::FrequencyPlanStore;
use crate::mask;
use crate::path::{FieldPath, PathSet};
use crate::rights::{AuthInfo, Rights};
use crate::state::SetDeviceState;
use crate::validate::session::KeysAt;
use crate::validate::{self, Rule, SessionFlags};

const KEY_BUNDLES: [KeysAt; 3] = [KeysAt::Session, KeysAt::PendingSession, KeysAt::QueuedJoinAccept];

/// Paths every response carries
const IMPLICIT_GET_PATHS: [&str; 3] = ["created_at", "ids", "updated_at"];

const TRAFFIC_PATHS: [&str; 2] = [
    "pending_session.queued_application_downlinks",
    "session.queued_application_downlinks",
];

/// Paths ResetFactoryDefaults writes
const RESET_PATHS: [&str; 8] = [
    "battery_percentage",
    "downlink_margin",
    "last_dev_status_received_at",
    "mac_state",
    "pending_mac_state",
    "pending_session",
    "power_state",
    "session",
];

fn key_leaf(at: KeysAt, name: &str, leaf: &str) -> FieldPath {
    FieldPath::parse(&format!("{}.{}.{}", at.path(), name, leaf))
}

/// `.key` leaves of every session key of every bundle
fn plaintext_key_paths() -> Vec<FieldPath> {
    KEY_BUNDLES
        .iter()
        .flat_map(|at| SESSION_KEY_NAMES.iter().map(move |name| key_leaf(*at, name, "key")))
        .collect()
}

/// Rights needed to read `paths`
fn read_rights(paths: &PathSet) -> Rights {
    let traffic: Vec<FieldPath> = TRAFFIC_PATHS.iter().map(|p| FieldPath::parse(p)).collect();
    let mut rights = Rights::DEVICES_READ;
    if paths.has_any(traffic.iter()) {
        rights |= Rights::TRAFFIC_READ;
    }
    if paths.has_any(plaintext_key_paths().iter()) {
        rights |= Rights::DEVICES_READ_KEYS;
    }
    rights
}

/// Rights needed to write `paths`
fn write_rights(paths: &PathSet) -> Rights {
    let mut key_paths = plaintext_key_paths();
    key_paths.extend(
        KEY_BUNDLES
            .iter()
            .map(|at| FieldPath::parse(&format!("{}.session_key_id", at.path()))),
    );
    if paths.has_any(key_paths.iter()) {
        Rights::DEVICES_WRITE | Rights::DEVICES_WRITE_KEYS
    } else {
        Rights::DEVICES_WRITE
    }
}

/// Fetch paths for `paths`: requested keys pull their envelope companions
fn device_get_paths(paths: &PathSet) -> PathSet {
    let mut gets = paths.clone();
    gets.add_fields(IMPLICIT_GET_PATHS);
    for at in KEY_BUNDLES {
        for name in SESSION_KEY_NAMES {
            if paths.has_field(&key_leaf(at, name, "key")) {
                gets.add_fields([
                    key_leaf(at, name, "encrypted_key"),
                    key_leaf(at, name, "kek_label"),
                ]);
            }
        }
    }
    gets
}

fn response_paths(paths: &PathSet) -> PathSet {
    let mut out = paths.clone();
    out.add_fields(IMPLICIT_GET_PATHS);
    out
}

fn is_set(sets: &PathSet, path: &str) -> bool {
    sets.has_field(&FieldPath::parse(path))
}

fn whole_record() -> PathSet {
    [FieldPath::root()].into_iter().collect()
}

/// Copy the forwarding network key into the other two network keys
fn copy_forwarding_key(dev: &mut EndDevice, at: KeysAt, sets: &mut PathSet) {
    if let Some(keys) = at.keys_mut(dev) {
        keys.nwk_s_enc_key = keys.f_nwk_s_int_key.clone();
        keys.s_nwk_s_int_key = keys.f_nwk_s_int_key.clone();
    }
    for name in ["nwk_s_enc_key", "s_nwk_s_int_key"] {
        sets.add_fields(
            ["encrypted_key", "kek_label", "key"]
                .iter()
                .map(|leaf| key_leaf(at, name, leaf)),
        );
    }
}

/// Set request: the record and the paths of it to write
#[derive(Clone, Debug, Default)]
pub struct SetEndDeviceRequest {
    /// Record carrying the new values
    pub end_device: EndDevice,
    /// Paths of `end_device` to write
    pub paths: PathSet,
}

impl SetEndDeviceRequest {
    /// Request writing `paths` of `end_device`
    pub fn new(end_device: EndDevice, paths: &[&str]) -> Self {
        Self {
            end_device,
            paths: PathSet::from_strs(paths),
        }
    }
}

/// RPC surface over end devices
#[derive(Clone)]
pub struct EndDeviceRegistry {
    devices: DeviceStore,
    profiles: ProfileStore,
    plans: Arc<dyn FrequencyPlanStore>,
    vault: Arc<dyn KeyVault>,
    publisher: Arc<dyn EventPublisher>,
    mac_states: Arc<dyn MacStateBuilder>,
    rules: Arc<Vec<Rule>>,
    device_kek_label: String,
    default_mac_settings: MacSettings,
}

impl EndDeviceRegistry {
    /// Registry over `devices` and `profiles` configured by `config`
    pub fn new(
        config: &Config,
        devices: DeviceStore,
        profiles: ProfileStore,
        plans: Arc<dyn FrequencyPlanStore>,
        vault: Arc<dyn KeyVault>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            devices,
            profiles,
            plans,
            vault,
            publisher,
            mac_states: Arc::new(DefaultMacStateBuilder),
            rules: Arc::new(validate::build_validation_rules()),
            device_kek_label: config.device_kek_label.clone(),
            default_mac_settings: config.default_mac_settings.mac_settings(),
        }
    }

    /// Use `builder` for fresh MAC states
    pub fn with_mac_state_builder(mut self, builder: Arc<dyn MacStateBuilder>) -> Self {
        self.mac_states = builder;
        self
    }

    /// Storage-level registry
    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    async fn unwrap_selected_keys(&self, dev: &mut EndDevice, paths: &PathSet) -> Result<()> {
        for at in KEY_BUNDLES {
            let prefix = FieldPath::parse(at.path());
            let selected = SESSION_KEY_NAMES
                .iter()
                .any(|name| paths.has_field(&key_leaf(at, name, "key")));
            let Some(keys) = at.keys_mut(dev).filter(|_| selected) else {
                continue;
            };
            *keys = unwrap_selected_session_keys(keys, &*self.vault, &prefix, paths)
                .await
                .map_err(|err| {
                    error!(error = %err, "Failed to unwrap selected keys");
                    err
                })?;
        }
        Ok(())
    }

    /// Fields `paths` of the device `ids`
    ///
    /// Requested session keys are returned in plaintext.
    pub async fn get(&self, auth: &AuthInfo, ids: &EndDeviceIdentifiers, paths: &PathSet) -> Result<EndDevice> {
        auth.require(&ids.application_ids.application_id, read_rights(paths))?;
        debug!(uid = %ids.uid(), paths = ?paths, "Get end device");
        let mut dev = self
            .devices
            .get_by_id(ids, &device_get_paths(paths))
            .await
            .map_err(|err| {
                log_registry_error(&err, "Failed to get device from registry");
                err
            })?;
        self.unwrap_selected_keys(&mut dev, paths).await?;
        mask::filtered(&dev, &response_paths(paths))
    }

    async fn profile(&self, ids: &MacSettingsProfileIdentifiers) -> Result<MacSettingsProfile> {
        self.profiles
            .get(ids, &PathSet::from_strs(&["ids", "mac_settings"]))
            .await
            .map_err(|err| Error::invalid_field_with_cause("mac_settings_profile_ids", err))
    }

    /// Replace explicit MAC settings by the referenced profile
    async fn resolve_profile(&self, st: &mut SetDeviceState) -> Result<Option<MacSettingsProfile>> {
        if !st.paths().touches(&FieldPath::parse("mac_settings_profile_ids")) {
            return Ok(None);
        }
        if st.paths().touches(&FieldPath::parse("mac_settings")) {
            return Err(Error::invalid_field("mac_settings"));
        }
        let Some(ids) = st.device().mac_settings_profile_ids.clone() else {
            return Ok(None);
        };
        let profile = self.profile(&ids).await?;
        validate::validate_profile(st, &profile, self.plans.clone())?;
        st.device_mut().mac_settings = None;
        st.add_set_fields(["mac_settings"]);
        Ok(Some(profile))
    }

    /// Create or update a device
    ///
    /// The response carries the requested paths, with session keys in the
    /// plaintext form the caller submitted.
    pub async fn set(&self, auth: &AuthInfo, req: SetEndDeviceRequest) -> Result<EndDevice> {
        let ids = req.end_device.ids.clone();
        if !ids.is_valid() {
            return Err(Error::InvalidIdentifiers);
        }
        auth.require(&ids.application_ids.application_id, write_rights(&req.paths))?;
        debug!(uid = %ids.uid(), paths = ?req.paths, "Set end device");
        self.set_device(req).await.map_err(|err| {
            log_registry_error(&err, "Failed to set device in registry");
            err
        })
    }

    async fn set_device(&self, req: SetEndDeviceRequest) -> Result<EndDevice> {
        let SetEndDeviceRequest { end_device, paths } = req;
        let ids = end_device.ids.clone();
        let mut st = SetDeviceState::new(end_device, paths.clone());

        validate::add_implicit_set_paths(&mut st);
        validate::validate_versions(&st)?;
        let profile = self.resolve_profile(&mut st).await?;
        validate::validate_dev_addr(&mut st)?;
        validate::validate_rules(&mut st, &self.rules)?;
        validate::validate_band_specifications(&mut st, self.plans.clone())?;
        validate::validate_adr_dynamic_parameters(&mut st)?;
        let restores =
            validate::validate_session_keys(&mut st, &self.device_kek_label, &*self.vault).await?;
        let flags = SessionFlags::default();
        validate::validate_session(&mut st, &flags)?;
        validate::validate_pending_session(&mut st, &flags)?;

        let profile_settings = profile.as_ref().and_then(|p| p.mac_settings.as_ref());
        let body = st.set_func(|stored, dev, sets| {
            self.complete_device(stored, dev, sets, &flags, profile_settings)
        });
        let mut event = None;
        let written = self
            .devices
            .set_by_id(&ids, &whole_record(), |stored| {
                let (dev, sets) = body(stored)?;
                event = Some(match stored {
                    None => Event::new(EVT_CREATE_END_DEVICE, vec![ids.clone()]),
                    Some(_) => Event::update(ids.clone(), &paths),
                });
                Ok(Some((dev, sets)))
            })
            .await?;
        let mut dev = written.ok_or(Error::NotFound { entity: "end device" })?;
        for restore in &restores {
            restore.restore(&mut dev);
        }
        if let Some(event) = event {
            self.publisher.publish(event);
        }
        mask::filtered(&dev, &response_paths(&paths))
    }

    /// Fill in derived fields once the stored record is known
    fn complete_device(
        &self,
        stored: Option<&EndDevice>,
        dev: &mut EndDevice,
        sets: &mut PathSet,
        flags: &SessionFlags,
        profile: Option<&MacSettings>,
    ) -> Result<()> {
        if flags.has_session() {
            let stored_mac = stored.and_then(|s| s.mac_state.as_ref());
            let mut version = stored_mac.and_then(|m| m.lorawan_version);
            if stored_mac.is_none() && !is_set(sets, "mac_state") {
                let state = self.new_mac_state(stored, dev, sets, profile)?;
                version = state.lorawan_version;
                dev.mac_state = Some(state);
                sets.add_fields(["mac_state"]);
            } else if is_set(sets, "mac_state.lorawan_version") {
                version = dev.mac_state.as_ref().and_then(|m| m.lorawan_version);
            }

            if is_set(sets, "session.keys.f_nwk_s_int_key.key")
                && !version.map_or(false, MacVersion::use_nwk_key)
            {
                copy_forwarding_key(dev, KeysAt::Session, sets);
            }

            let stored_session = stored.and_then(|s| s.session.as_ref());
            let session_key_id = |s: Option<&Session>| s.map(|s| s.keys.session_key_id.clone());
            let restart = (is_set(sets, "session.started_at")
                && dev.session.as_ref().and_then(|s| s.started_at).is_none())
                || (is_set(sets, "session.keys.session_key_id")
                    && session_key_id(dev.session.as_ref()) != session_key_id(stored_session))
                || stored_session.and_then(|s| s.started_at).is_none();
            if let Some(session) = dev.session.as_mut().filter(|_| restart) {
                session.started_at = Some(Utc::now());
                sets.add_fields(["session.started_at"]);
            }
        }

        if flags.has_pending_session() || flags.has_queued_join_accept() {
            let version = if is_set(sets, "pending_mac_state.lorawan_version") {
                dev.pending_mac_state.as_ref().and_then(|m| m.lorawan_version)
            } else {
                stored
                    .and_then(|s| s.pending_mac_state.as_ref())
                    .and_then(|m| m.lorawan_version)
            };
            let use_nwk_key = version.map_or(false, MacVersion::use_nwk_key);
            if flags.has_pending_session()
                && is_set(sets, "pending_session.keys.f_nwk_s_int_key.key")
                && !use_nwk_key
            {
                copy_forwarding_key(dev, KeysAt::PendingSession, sets);
            }
            if flags.has_queued_join_accept()
                && is_set(sets, "pending_mac_state.queued_join_accept.keys.f_nwk_s_int_key.key")
                && !use_nwk_key
            {
                copy_forwarding_key(dev, KeysAt::QueuedJoinAccept, sets);
            }
        }

        if let Some(stored) = stored {
            if is_set(sets, "multicast") && dev.multicast != stored.multicast {
                return Err(Error::invalid_field("multicast"));
            }
            if is_set(sets, "supports_join") && dev.supports_join != stored.supports_join {
                return Err(Error::invalid_field("supports_join"));
            }
        }
        Ok(())
    }

    /// MAC state for a session written without one
    ///
    /// Built from the record as it will be stored, then overlaid with any
    /// `mac_state` subfields the request sets.
    fn new_mac_state(
        &self,
        stored: Option<&EndDevice>,
        dev: &EndDevice,
        sets: &PathSet,
        profile: Option<&MacSettings>,
    ) -> Result<MacState> {
        let base = stored.cloned().unwrap_or_default();
        let effective = mask::set_fields(&base, dev, sets)?;
        let state = self.mac_states.new_state(
            &effective,
            &*self.plans,
            &self.default_mac_settings,
            profile,
        )?;
        let prefix = FieldPath::parse("mac_state");
        let overlay: Vec<FieldPath> = sets.iter().filter_map(|p| p.strip_prefix(&prefix)).collect();
        if overlay.is_empty() {
            return Ok(state);
        }
        let requested = dev.mac_state.clone().unwrap_or_default();
        mask::set_fields(&state, &requested, &overlay)
    }

    /// Reset the device to the state after a factory reset
    ///
    /// Telemetry and every MAC and pending state are cleared. OTAA devices
    /// lose their session and must rejoin; other devices keep the address,
    /// keys and queued downlinks of their session under a fresh MAC state.
    pub async fn reset_factory_defaults(
        &self,
        auth: &AuthInfo,
        ids: &EndDeviceIdentifiers,
        paths: &PathSet,
    ) -> Result<EndDevice> {
        auth.require(
            &ids.application_ids.application_id,
            Rights::DEVICES_WRITE | read_rights(paths),
        )?;
        debug!(uid = %ids.uid(), "Reset end device to factory defaults");
        self.reset_device(ids, paths).await.map_err(|err| {
            log_registry_error(&err, "Failed to reset device state in registry");
            err
        })
    }

    async fn reset_device(&self, ids: &EndDeviceIdentifiers, paths: &PathSet) -> Result<EndDevice> {
        let profile_ids = self
            .devices
            .get_by_id(ids, &PathSet::from_strs(&["mac_settings_profile_ids"]))
            .await?
            .mac_settings_profile_ids;
        let profile = match &profile_ids {
            Some(profile_ids) => Some(self.profile(profile_ids).await?),
            None => None,
        };
        let profile_settings = profile.as_ref().and_then(|p| p.mac_settings.as_ref());

        let written = self
            .devices
            .set_by_id(ids, &whole_record(), |stored| {
                let Some(stored) = stored else {
                    return Err(Error::NotFound { entity: "end device" });
                };
                if stored.mac_settings_profile_ids != profile_ids {
                    return Err(Error::Conflict { key: ids.uid() });
                }
                let mut dev = stored.clone();
                dev.battery_percentage = None;
                dev.downlink_margin = 0;
                dev.last_dev_status_received_at = None;
                dev.mac_state = None;
                dev.pending_mac_state = None;
                dev.pending_session = None;
                dev.power_state = PowerState::Unknown;
                if dev.supports_join {
                    dev.session = None;
                } else {
                    let Some(session) = dev.session.take() else {
                        return Err(Error::CorruptedMacState {
                            source: Box::new(Error::MissingSession),
                        });
                    };
                    dev.session = Some(Session {
                        dev_addr: session.dev_addr,
                        keys: session.keys,
                        started_at: Some(Utc::now()),
                        queued_application_downlinks: session.queued_application_downlinks,
                        ..Default::default()
                    });
                    dev.mac_state = Some(self.mac_states.new_state(
                        &dev,
                        &*self.plans,
                        &self.default_mac_settings,
                        profile_settings,
                    )?);
                }
                Ok(Some((dev, PathSet::from_strs(&RESET_PATHS))))
            })
            .await?;
        let mut dev = written.ok_or(Error::NotFound { entity: "end device" })?;
        self.unwrap_selected_keys(&mut dev, paths).await?;
        mask::filtered(&dev, &response_paths(paths))
    }

    /// Delete the device `ids`
    pub async fn delete(&self, auth: &AuthInfo, ids: &EndDeviceIdentifiers) -> Result<()> {
        auth.require(&ids.application_ids.application_id, Rights::DEVICES_WRITE)?;
        debug!(uid = %ids.uid(), "Delete end device");
        self.devices
            .set_by_id(ids, &PathSet::new(), |stored| match stored {
                None => Err(Error::NotFound { entity: "end device" }),
                Some(_) => Ok(None),
            })
            .await
            .map_err(|err| {
                log_registry_error(&err, "Failed to delete device from registry");
                err
            })?;
        self.publisher
            .publish(Event::new(EVT_DELETE_END_DEVICE, vec![ids.clone()]));
        Ok(())
    }

    /// Delete the existing devices among `device_ids`, returning the ones removed
    pub async fn batch_delete(
        &self,
        auth: &AuthInfo,
        application_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<EndDeviceIdentifiers>> {
        auth.require(application_id, Rights::DEVICES_WRITE)?;
        debug!(application_id, count = device_ids.len(), "Batch delete end devices");
        let deleted = self
            .devices
            .batch_delete(application_id, device_ids)
            .await
            .map_err(|err| {
                log_registry_error(&err, "Failed to delete devices from registry");
                err
            })?;
        if !deleted.is_empty() {
            self.publisher
                .publish(Event::new(EVT_BATCH_DELETE_END_DEVICES, deleted.clone()));
        }
        Ok(deleted)
    }
}
