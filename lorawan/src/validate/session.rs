//! Session, MAC state and key envelope consistency
//!
//! Plaintext network session keys in a Set request are wrapped with the
//! configured KEK before they are written. The caller still gets plaintext
//! back: every wrapped key yields a [`KeyRestore`] applied to the response.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::crypto::{session_key_mut, wrap_aes128_key, KeyVault};
use crate::device::{AesKey, DeviceClass, EndDevice, KeyEnvelope, SessionKeys};
use crate::error::Result;
use crate::lorawan::mac::MacVersion;
use crate::path::FieldPath;
use crate::state::{FieldBag, SetDeviceState};

use super::{mac_state_leaves, prefixed};

/// Network session key names, forwarding key first
pub const NETWORK_KEY_NAMES: [&str; 3] = ["f_nwk_s_int_key", "nwk_s_enc_key", "s_nwk_s_int_key"];

const ENVELOPE_LEAVES: [&str; 3] = ["encrypted_key", "kek_label", "key"];

/// Location of a session key bundle in the device record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysAt {
    /// `session.keys`
    Session,
    /// `pending_session.keys`
    PendingSession,
    /// `pending_mac_state.queued_join_accept.keys`
    QueuedJoinAccept,
}

impl KeysAt {
    /// Path of the key bundle
    pub fn path(self) -> &'static str {
        match self {
            KeysAt::Session => "session.keys",
            KeysAt::PendingSession => "pending_session.keys",
            KeysAt::QueuedJoinAccept => "pending_mac_state.queued_join_accept.keys",
        }
    }

    /// Key bundle of `dev`, if present
    pub fn keys(self, dev: &EndDevice) -> Option<&SessionKeys> {
        match self {
            KeysAt::Session => dev.session.as_ref().map(|s| &s.keys),
            KeysAt::PendingSession => dev.pending_session.as_ref().map(|s| &s.keys),
            KeysAt::QueuedJoinAccept => dev
                .pending_mac_state
                .as_ref()
                .and_then(|s| s.queued_join_accept.as_ref())
                .map(|a| &a.keys),
        }
    }

    /// Mutable key bundle of `dev`, if present
    pub fn keys_mut(self, dev: &mut EndDevice) -> Option<&mut SessionKeys> {
        match self {
            KeysAt::Session => dev.session.as_mut().map(|s| &mut s.keys),
            KeysAt::PendingSession => dev.pending_session.as_mut().map(|s| &mut s.keys),
            KeysAt::QueuedJoinAccept => dev
                .pending_mac_state
                .as_mut()
                .and_then(|s| s.queued_join_accept.as_mut())
                .map(|a| &mut a.keys),
        }
    }

    fn leaf(self, name: &str, leaf: &str) -> String {
        format!("{}.{}.{}", self.path(), name, leaf)
    }

    fn envelope_leaves(self, names: &[&str]) -> Vec<FieldPath> {
        names
            .iter()
            .flat_map(|name| ENVELOPE_LEAVES.iter().map(move |leaf| self.leaf(name, leaf).into()))
            .collect()
    }
}

fn session_key<'a>(keys: &'a SessionKeys, name: &str) -> Option<&'a KeyEnvelope> {
    match name {
        "f_nwk_s_int_key" => keys.f_nwk_s_int_key.as_ref(),
        "s_nwk_s_int_key" => keys.s_nwk_s_int_key.as_ref(),
        "nwk_s_enc_key" => keys.nwk_s_enc_key.as_ref(),
        "app_s_key" => keys.app_s_key.as_ref(),
        _ => None,
    }
}

/// Plaintext of a key wrapped before writing, restored in the response
#[derive(Clone, Debug)]
pub struct KeyRestore {
    at: KeysAt,
    name: &'static str,
    key: AesKey,
}

impl KeyRestore {
    /// Put the plaintext key back into `dev`
    pub fn restore(&self, dev: &mut EndDevice) {
        if let Some(slot) = self
            .at
            .keys_mut(dev)
            .and_then(|keys| session_key_mut(keys, self.name))
        {
            *slot = Some(KeyEnvelope::plain(self.key));
        }
    }
}

/// Facts learned by the consistency checks, read by the transaction body
#[derive(Clone, Debug, Default)]
pub struct SessionFlags {
    session: Arc<AtomicBool>,
    pending_session: Arc<AtomicBool>,
    queued_join_accept: Arc<AtomicBool>,
}

impl SessionFlags {
    /// Whether the effective record has a session
    pub fn has_session(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    /// Whether the effective record has a pending session
    pub fn has_pending_session(&self) -> bool {
        self.pending_session.load(Ordering::SeqCst)
    }

    /// Whether the effective record has a queued join-accept
    pub fn has_queued_join_accept(&self) -> bool {
        self.queued_join_accept.load(Ordering::SeqCst)
    }
}

fn non_zero(envelope: Option<&KeyEnvelope>) -> bool {
    envelope.map_or(false, |e| !e.is_zero())
}

/// Reject zero session values among set fields and wrap plaintext keys
///
/// Every set `.key` leaf of a network session key holding plaintext is
/// replaced by its envelope under `kek_label`.
pub async fn validate_session_keys(
    st: &mut SetDeviceState,
    kek_label: &str,
    vault: &dyn KeyVault,
) -> Result<Vec<KeyRestore>> {
    {
        let dev = st.device();
        if let Some(session) = &dev.session {
            let keys = &session.keys;
            st.validate_set_field("session.dev_addr", || {
                session.dev_addr.map_or(false, |a| !a.is_zero())
            })?;
            st.validate_set_field("session.keys.f_nwk_s_int_key.key", || {
                non_zero(keys.f_nwk_s_int_key.as_ref())
            })?;
            st.validate_set_field("session.keys.nwk_s_enc_key.key", || {
                keys.nwk_s_enc_key.as_ref().map_or(true, |e| !e.is_zero())
            })?;
            st.validate_set_field("session.keys.s_nwk_s_int_key.key", || {
                keys.s_nwk_s_int_key.as_ref().map_or(true, |e| !e.is_zero())
            })?;
        }
        if let Some(session) = &dev.pending_session {
            let keys = &session.keys;
            st.validate_set_field("pending_session.dev_addr", || {
                session.dev_addr.map_or(false, |a| !a.is_zero())
            })?;
            for name in NETWORK_KEY_NAMES {
                st.validate_set_field(&KeysAt::PendingSession.leaf(name, "key"), || {
                    non_zero(session_key(keys, name))
                })?;
            }
            st.validate_set_field("pending_session.keys.session_key_id", || {
                !keys.session_key_id.is_empty()
            })?;
        }
        if let Some(accept) = dev
            .pending_mac_state
            .as_ref()
            .and_then(|s| s.queued_join_accept.as_ref())
        {
            for name in NETWORK_KEY_NAMES {
                st.validate_set_field(&KeysAt::QueuedJoinAccept.leaf(name, "key"), || {
                    non_zero(session_key(&accept.keys, name))
                })?;
            }
            st.validate_set_field("pending_mac_state.queued_join_accept.keys.session_key_id", || {
                !accept.keys.session_key_id.is_empty()
            })?;
            st.validate_set_field("pending_mac_state.queued_join_accept.payload", || {
                !accept.payload.is_empty()
            })?;
            st.validate_set_field("pending_mac_state.queued_join_accept.request.dev_addr", || {
                accept.request.dev_addr.map_or(false, |a| !a.is_zero())
            })?;
        }
    }

    let mut restores = Vec::new();
    for at in [KeysAt::Session, KeysAt::PendingSession, KeysAt::QueuedJoinAccept] {
        for name in NETWORK_KEY_NAMES {
            if !st.has_set_field(at.leaf(name, "key")) {
                continue;
            }
            let Some(key) = at
                .keys(st.device())
                .and_then(|keys| session_key(keys, name))
                .and_then(KeyEnvelope::key)
                .copied()
            else {
                continue;
            };
            let wrapped = wrap_aes128_key(&key, kek_label, vault).await?;
            if let Some(slot) = at
                .keys_mut(st.device_mut())
                .and_then(|keys| session_key_mut(keys, name))
            {
                *slot = Some(wrapped);
            }
            st.add_set_fields([at.leaf(name, "encrypted_key"), at.leaf(name, "kek_label")]);
            restores.push(KeyRestore { at, name, key });
        }
    }
    Ok(restores)
}

fn envelope<'a>(bag: &FieldBag<'a>, at: KeysAt, name: &str, leaf: &str) -> Option<&'a KeyEnvelope> {
    at.keys(bag.device(at.leaf(name, leaf)))
        .and_then(|keys| session_key(keys, name))
}

/// Whether the effective key `name` has neither plaintext nor wrapped material
fn set_key_is_zero(bag: &FieldBag<'_>, at: KeysAt, name: &str) -> bool {
    let plain = envelope(bag, at, name, "key")
        .and_then(KeyEnvelope::key)
        .map_or(true, AesKey::is_zero);
    let wrapped = envelope(bag, at, name, "encrypted_key")
        .and_then(KeyEnvelope::encrypted_key)
        .map_or(true, <[u8]>::is_empty);
    plain && wrapped
}

/// Whether the effective keys `a` and `b` are the same envelope
fn set_key_equal(bag: &FieldBag<'_>, at: KeysAt, a: &str, b: &str) -> bool {
    let plain = |name: &str| envelope(bag, at, name, "key").and_then(KeyEnvelope::key);
    let wrapped =
        |name: &str| envelope(bag, at, name, "encrypted_key").and_then(KeyEnvelope::encrypted_key);
    let label = |name: &str| envelope(bag, at, name, "kek_label").map_or("", KeyEnvelope::kek_label);
    plain(a) == plain(b) && wrapped(a) == wrapped(b) && label(a) == label(b)
}

fn key_path(at: KeysAt, name: &str) -> Option<FieldPath> {
    Some(at.leaf(name, "key").into())
}

/// First network key of the bundle at `at` that is zero or, before
/// LoRaWAN 1.1, differs from the forwarding key
fn network_keys_violation(bag: &FieldBag<'_>, at: KeysAt, use_nwk_key: bool) -> Option<FieldPath> {
    if let Some(name) = NETWORK_KEY_NAMES.iter().find(|name| set_key_is_zero(bag, at, name)) {
        return key_path(at, name);
    }
    if use_nwk_key {
        return None;
    }
    NETWORK_KEY_NAMES[1..]
        .iter()
        .find(|name| !set_key_equal(bag, at, NETWORK_KEY_NAMES[0], name))
        .and_then(|name| key_path(at, name))
}

/// Register the consistency check of the active session and MAC state
///
/// A session needs a MAC state, which may be built later when absent, a
/// device address and a forwarding network key. From LoRaWAN 1.1 on, both
/// other network keys are required. Before, set keys must match the
/// forwarding key.
pub fn validate_session(st: &mut SetDeviceState, flags: &SessionFlags) -> Result<()> {
    let mac_paths = mac_state_leaves("mac_state");
    let mut session_paths: Vec<FieldPath> = vec!["session.dev_addr".into()];
    session_paths.extend(KeysAt::Session.envelope_leaves(&NETWORK_KEY_NAMES));
    session_paths.extend(prefixed(
        "session",
        &[
            "keys.session_key_id",
            "last_conf_f_cnt_down",
            "last_f_cnt_up",
            "last_n_f_cnt_down",
            "started_at",
        ],
    ));

    let mut paths: Vec<FieldPath> = vec!["lorawan_version".into()];
    paths.extend(mac_paths.iter().cloned());
    paths.push("multicast".into());
    paths.extend(session_paths.iter().cloned());
    paths.push("supports_join".into());
    if !st.has_set_any(paths.iter()) {
        return Ok(());
    }

    let mac_state_set = st.has_set_field("mac_state");
    let keys_set: Vec<bool> = NETWORK_KEY_NAMES
        .iter()
        .map(|name| st.has_set_field(KeysAt::Session.leaf(name, "key")))
        .collect();
    let flags = flags.clone();
    st.validate_fields(paths, move |bag| {
        let has_mac_state = mac_paths.iter().any(|p| bag.device(p).mac_state.is_some());
        let has_session = session_paths.iter().any(|p| bag.device(p).session.is_some());
        flags.session.store(has_session, Ordering::SeqCst);

        let multicast = bag.device("multicast").multicast;
        if !has_mac_state && !has_session && !multicast {
            return None;
        }
        if !has_session {
            return Some("session".into());
        }
        if !has_mac_state && mac_state_set {
            return Some("mac_state".into());
        }

        let top_level = bag.device("lorawan_version").lorawan_version;
        let version = if has_mac_state {
            let class_a = bag
                .device("mac_state.device_class")
                .mac_state
                .as_ref()
                .map_or(false, |s| s.device_class == DeviceClass::A);
            if multicast && class_a {
                return Some("mac_state.device_class".into());
            }
            match &bag.device("mac_state.lorawan_version").mac_state {
                None => return Some("mac_state.lorawan_version".into()),
                Some(s) => s.lorawan_version.or(top_level),
            }
        } else {
            top_level
        };

        if bag.device("session.dev_addr").session.is_none() {
            return Some("session.dev_addr".into());
        }
        let at = KeysAt::Session;
        let forwarding = NETWORK_KEY_NAMES[0];
        if set_key_is_zero(bag, at, forwarding) {
            return key_path(at, forwarding);
        }
        if version.map_or(false, MacVersion::use_nwk_key) {
            if let Some(violation) = network_keys_violation(bag, at, true) {
                return Some(violation);
            }
        } else {
            let unequal = NETWORK_KEY_NAMES
                .iter()
                .zip(&keys_set)
                .skip(1)
                .find(|(name, set)| **set && !set_key_equal(bag, at, forwarding, name));
            if let Some((name, _)) = unequal {
                return key_path(at, name);
            }
        }

        if bag.device("supports_join").supports_join
            && bag.device("session.keys.session_key_id").session.is_none()
        {
            return Some("session.keys.session_key_id".into());
        }
        None
    })
}

const JOIN_REQUEST_LEAVES: &[&str] = &[
    "pending_join_request.cf_list.ch_masks",
    "pending_join_request.cf_list.freq",
    "pending_join_request.downlink_settings.opt_neg",
    "pending_join_request.downlink_settings.rx1_dr_offset",
    "pending_join_request.downlink_settings.rx2_dr",
    "pending_join_request.rx1_delay",
];

const JOIN_ACCEPT_LEAVES: &[&str] = &[
    "correlation_ids",
    "keys.session_key_id",
    "payload",
    "request.cf_list.ch_masks",
    "request.cf_list.freq",
    "request.dev_addr",
    "request.downlink_settings.opt_neg",
    "request.downlink_settings.rx1_dr_offset",
    "request.downlink_settings.rx2_dr",
    "request.net_id",
    "request.rx1_delay",
];

/// Register the consistency check of the pending session and MAC state
///
/// A pending session needs a pending MAC state. A pending MAC state needs a
/// pending session or a queued join-accept, and each of those needs complete
/// key material.
pub fn validate_pending_session(st: &mut SetDeviceState, flags: &SessionFlags) -> Result<()> {
    let mut accept_paths = prefixed("pending_mac_state.queued_join_accept", JOIN_ACCEPT_LEAVES);
    accept_paths.extend(KeysAt::QueuedJoinAccept.envelope_leaves(&[
        "app_s_key",
        "f_nwk_s_int_key",
        "nwk_s_enc_key",
        "s_nwk_s_int_key",
    ]));
    let mut mac_paths = mac_state_leaves("pending_mac_state");
    mac_paths.extend(prefixed("pending_mac_state", JOIN_REQUEST_LEAVES));
    mac_paths.extend(accept_paths.iter().cloned());

    let mut session_paths: Vec<FieldPath> = vec!["pending_session.dev_addr".into()];
    session_paths.extend(KeysAt::PendingSession.envelope_leaves(&NETWORK_KEY_NAMES));
    session_paths.push("pending_session.keys.session_key_id".into());

    let paths: Vec<FieldPath> = mac_paths.iter().chain(&session_paths).cloned().collect();
    if !st.has_set_any(paths.iter()) {
        return Ok(());
    }

    let flags = flags.clone();
    st.validate_fields(paths, move |bag| {
        let has_mac_state = mac_paths
            .iter()
            .any(|p| bag.device(p).pending_mac_state.is_some());
        let has_session = session_paths
            .iter()
            .any(|p| bag.device(p).pending_session.is_some());
        flags.pending_session.store(has_session, Ordering::SeqCst);
        flags.queued_join_accept.store(false, Ordering::SeqCst);

        if !has_mac_state && !has_session {
            return None;
        }
        if !has_mac_state {
            return Some("pending_mac_state".into());
        }
        let accept_of = |dev: &EndDevice| {
            dev.pending_mac_state
                .as_ref()
                .and_then(|s| s.queued_join_accept.as_ref())
                .is_some()
        };
        let has_accept = accept_paths.iter().any(|p| accept_of(bag.device(p)));
        flags.queued_join_accept.store(has_accept, Ordering::SeqCst);

        let version = match &bag.device("pending_mac_state.lorawan_version").pending_mac_state {
            Some(s) => s.lorawan_version,
            None => return Some("pending_mac_state.lorawan_version".into()),
        };
        let use_nwk_key = version.map_or(false, MacVersion::use_nwk_key);

        if has_session {
            if bag.device("pending_session.dev_addr").pending_session.is_none() {
                return Some("pending_session.dev_addr".into());
            }
            if let Some(violation) = network_keys_violation(bag, KeysAt::PendingSession, use_nwk_key) {
                return Some(violation);
            }
            if bag
                .device("pending_session.keys.session_key_id")
                .pending_session
                .is_none()
            {
                return Some("pending_session.keys.session_key_id".into());
            }
        } else if !has_accept {
            return Some("pending_mac_state.queued_join_accept".into());
        }

        if has_accept {
            let at = KeysAt::QueuedJoinAccept;
            if let Some(violation) = network_keys_violation(bag, at, use_nwk_key) {
                return Some(violation);
            }
            let required = [
                "pending_mac_state.queued_join_accept.keys.session_key_id",
                "pending_mac_state.queued_join_accept.payload",
                "pending_mac_state.queued_join_accept.request.dev_addr",
            ];
            if let Some(path) = required.iter().find(|p| !accept_of(bag.device(**p))) {
                return Some((*path).into());
            }
        }
        None
    })
}
