use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;

use lorawan_ns::{
    config::Config,
    device::{
        mac_state::{JoinAcceptRequest, QueuedJoinAccept},
        power::from_battery_level,
        session::ApplicationDownlink,
        EndDevice, KeyEnvelope, PowerState, Session, Val,
    },
    error::Error,
    events::{
        EVT_BATCH_DELETE_END_DEVICES, EVT_CREATE_END_DEVICE, EVT_DELETE_END_DEVICE,
        EVT_UPDATE_END_DEVICE,
    },
    lorawan::{DefaultMacStateBuilder, MacStateBuilder, MacVersion, StaticPlanStore},
    path::PathSet,
    registry::SetEndDeviceRequest,
    rights::{AuthInfo, Rights},
};

mod mock;
use mock::*;

fn paths(paths: &[&str]) -> PathSet {
    PathSet::from_strs(paths)
}

fn downlinks(n: u32) -> Vec<ApplicationDownlink> {
    (0..n)
        .map(|i| ApplicationDownlink {
            session_key_id: b"abp".to_vec(),
            f_port: 1 + i,
            f_cnt: i,
            frm_payload: vec![0xca, 0xfe, i as u8],
            confirmed: i % 2 == 0,
            correlation_ids: vec![format!("as:downlink:{}", i)],
        })
        .collect()
}

#[tokio::test]
async fn test_abp_pre_1_1_derives_network_keys() {
    let env = Env::new();
    let created = env
        .create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();
    let session = created.session.unwrap();
    assert_eq!(session.keys.f_nwk_s_int_key, plain(0x11));
    assert_eq!(session.dev_addr, Some(dev_addr()));
    assert!(created.created_at.is_some());
    assert_eq!(created.mac_state, None);
    assert_eq!(env.events.names(), vec![EVT_CREATE_END_DEVICE]);

    let stored = env
        .registry
        .devices()
        .get_by_id(&ids("abp"), &paths(&["session.keys", "mac_state"]))
        .await
        .unwrap();
    let keys = stored.session.unwrap().keys;
    assert_matches!(
        &keys.f_nwk_s_int_key,
        Some(KeyEnvelope::Wrapped { kek_label, .. }) if kek_label == KEK_LABEL
    );
    assert_eq!(keys.nwk_s_enc_key, keys.f_nwk_s_int_key);
    assert_eq!(keys.s_nwk_s_int_key, keys.f_nwk_s_int_key);
    assert_eq!(stored.mac_state.unwrap().lorawan_version, Some(MacVersion::V1_0_3));

    let got = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["session.keys", "session.started_at"]))
        .await
        .unwrap();
    let session = got.session.unwrap();
    assert!(session.started_at.is_some());
    assert_eq!(session.keys.f_nwk_s_int_key, plain(0x11));
    assert_eq!(session.keys.nwk_s_enc_key, plain(0x11));
    assert_eq!(session.keys.s_nwk_s_int_key, plain(0x11));
    assert_eq!(got.ids.dev_addr, Some(dev_addr()));
}

#[tokio::test]
async fn test_get_filters_to_requested_paths() {
    let env = Env::new();
    env.create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();

    let got = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["frequency_plan_id"]))
        .await
        .unwrap();
    assert_eq!(got.frequency_plan_id, FREQUENCY_PLAN);
    assert_eq!(got.ids.device_id, "abp");
    assert!(got.updated_at.is_some());
    assert_eq!(got.session, None);
    assert_eq!(got.lorawan_version, None);

    let err = env
        .registry
        .get(&admin(), &ids("nope"), &paths(&["frequency_plan_id"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::NotFound { .. });
}

#[tokio::test]
async fn test_get_with_rotated_kek_names_the_key() {
    let env = Env::new();
    env.create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();
    env.vault.set_key(KEK_LABEL, vec![0xff; 16]);

    let err = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["session.keys.f_nwk_s_int_key.key"]))
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("session.keys.f_nwk_s_int_key"));

    // Paths without key material never touch the vault
    env.registry
        .get(&admin(), &ids("abp"), &paths(&["session.dev_addr"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_fails_without_kek() {
    let registry = registry_with_vault(Arc::new(FailingVault));
    let err = registry
        .set(
            &admin(),
            SetEndDeviceRequest::new(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS),
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::KeyNotFound { label } if label == KEK_LABEL);
    let err = registry
        .get(&admin(), &ids("abp"), &paths(&["ids"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::NotFound { .. });
}

#[tokio::test]
async fn test_abp_rejects_zero_forwarding_key() {
    let env = Env::new();
    let mut dev = abp_device("abp", MacVersion::V1_0_3);
    if let Some(session) = dev.session.as_mut() {
        session.keys.f_nwk_s_int_key = None;
    }
    let err = env.create(dev, ABP_PATHS).await.unwrap_err();
    assert_eq!(err.field(), Some("session.keys.f_nwk_s_int_key.key"));
    assert!(env.events.names().is_empty());
}

#[tokio::test]
async fn test_abp_1_0_4_requires_dev_eui() {
    let env = Env::new();
    let err = env
        .create(abp_device("abp", MacVersion::V1_0_4), ABP_PATHS)
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("ids.dev_eui"));
}

#[tokio::test]
async fn test_abp_1_1_requires_every_network_key() {
    let env = Env::new();
    let err = env
        .create(abp_device("abp", MacVersion::V1_1), ABP_PATHS)
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("session.keys.nwk_s_enc_key.key"));

    let mut dev = abp_device("abp", MacVersion::V1_1);
    if let Some(session) = dev.session.as_mut() {
        session.keys.nwk_s_enc_key = plain(0x12);
        session.keys.s_nwk_s_int_key = plain(0x13);
    }
    let mut set = ABP_PATHS.to_vec();
    set.extend(["session.keys.nwk_s_enc_key.key", "session.keys.s_nwk_s_int_key.key"]);
    env.create(dev, &set).await.unwrap();

    let got = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["session.keys"]))
        .await
        .unwrap();
    let keys = got.session.unwrap().keys;
    assert_eq!(keys.f_nwk_s_int_key, plain(0x11));
    assert_eq!(keys.nwk_s_enc_key, plain(0x12));
    assert_eq!(keys.s_nwk_s_int_key, plain(0x13));
}

#[tokio::test]
async fn test_otaa_join_flow() {
    let env = Env::new();
    let created = env.create(otaa_device("otaa"), OTAA_PATHS).await.unwrap();
    assert_eq!(created.session, None);
    assert_eq!(created.mac_state, None);

    // Join-request accepted: pending MAC state with a queued join-accept
    let defaults = Config::default().default_mac_settings.mac_settings();
    let mut pending_mac = DefaultMacStateBuilder
        .new_state(
            &otaa_device("otaa"),
            &StaticPlanStore::with_builtin(),
            &defaults,
            None,
        )
        .unwrap();
    pending_mac.queued_join_accept = Some(QueuedJoinAccept {
        keys: joined_keys(b"session-1"),
        payload: vec![0x20; 33],
        request: JoinAcceptRequest {
            dev_addr: Some(dev_addr()),
            net_id: vec![0x00, 0x00, 0x13],
            rx1_delay: 5,
            ..Default::default()
        },
        correlation_ids: vec!["ns:uplink:1".into()],
    });
    let mut dev = EndDevice::new(ids("otaa"));
    dev.pending_mac_state = Some(pending_mac.clone());
    env.create(dev, &["pending_mac_state"]).await.unwrap();

    let got = env
        .registry
        .get(&admin(), &ids("otaa"), &paths(&["mac_state", "pending_mac_state"]))
        .await
        .unwrap();
    assert_eq!(got.mac_state, None);
    let accept = got
        .pending_mac_state
        .and_then(|s| s.queued_join_accept)
        .unwrap();
    assert_eq!(accept.keys, joined_keys(b"session-1"));

    // Join-accept sent: pending session alongside the pending MAC state
    let mut dev = EndDevice::new(ids("otaa"));
    dev.pending_mac_state = Some(pending_mac);
    dev.pending_session = Some(Session {
        dev_addr: Some(dev_addr()),
        keys: joined_keys(b"session-1"),
        ..Default::default()
    });
    env.create(dev, &["pending_mac_state", "pending_session"])
        .await
        .unwrap();

    // First uplink in the new session: promote the pending state
    let pending = env
        .registry
        .get(&admin(), &ids("otaa"), &paths(&["pending_mac_state", "pending_session"]))
        .await
        .unwrap();
    let mut mac_state = pending.pending_mac_state.unwrap();
    mac_state.queued_join_accept = None;
    mac_state.pending_join_request = None;
    let mut dev = EndDevice::new(ids("otaa"));
    dev.session = pending.pending_session;
    dev.mac_state = Some(mac_state);
    let promoted = env
        .create(dev, &["mac_state", "pending_mac_state", "pending_session", "session"])
        .await
        .unwrap();
    assert_eq!(promoted.pending_session, None);
    assert_eq!(promoted.pending_mac_state, None);
    let session = promoted.session.unwrap();
    assert!(session.started_at.is_some());
    assert_eq!(session.keys, joined_keys(b"session-1"));
    assert_eq!(promoted.ids.dev_addr, Some(dev_addr()));

    assert_eq!(
        env.events.names(),
        vec![
            EVT_CREATE_END_DEVICE,
            EVT_UPDATE_END_DEVICE,
            EVT_UPDATE_END_DEVICE,
            EVT_UPDATE_END_DEVICE
        ]
    );
}

#[tokio::test]
async fn test_pending_session_requires_pending_mac_state() {
    let env = Env::new();
    env.create(otaa_device("otaa"), OTAA_PATHS).await.unwrap();
    let mut dev = EndDevice::new(ids("otaa"));
    dev.pending_session = Some(Session {
        dev_addr: Some(dev_addr()),
        keys: joined_keys(b"session-1"),
        ..Default::default()
    });
    let err = env.create(dev, &["pending_session"]).await.unwrap_err();
    assert_eq!(err.field(), Some("pending_mac_state"));
}

#[tokio::test]
async fn test_otaa_requires_euis() {
    let env = Env::new();
    let mut dev = otaa_device("otaa");
    dev.ids.join_eui = None;
    let err = env.create(dev, OTAA_PATHS).await.unwrap_err();
    assert_eq!(err.field(), Some("ids.join_eui"));
}

#[tokio::test]
async fn test_update_cannot_change_dev_eui() {
    let env = Env::new();
    env.create(otaa_device("otaa"), OTAA_PATHS).await.unwrap();
    let mut dev = otaa_device("otaa");
    dev.ids.dev_eui = Some(lorawan_ns::device::Eui64::from([0xff; 8]));
    let err = env.create(dev, &["ids.dev_eui"]).await.unwrap_err();
    assert_matches!(err, Error::ReadOnlyField { field } if field == "ids.dev_eui");
}

#[tokio::test]
async fn test_session_key_id_change_restarts_session() {
    let env = Env::new();
    env.create(otaa_device("otaa"), OTAA_PATHS).await.unwrap();

    let mut dev = EndDevice::new(ids("otaa"));
    let mut session = Session::new(dev_addr(), joined_keys(b"session-1"));
    session.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    dev.session = Some(session.clone());
    let first = env
        .create(dev, &["session", "session.started_at"])
        .await
        .unwrap()
        .session
        .unwrap()
        .started_at;

    // Same key identifier keeps the start time
    let mut dev = EndDevice::new(ids("otaa"));
    dev.session = Some(Session {
        last_f_cnt_up: 42,
        ..session.clone()
    });
    let kept = env
        .create(dev, &["session.last_f_cnt_up", "session.keys.session_key_id"])
        .await
        .unwrap();
    let got = env
        .registry
        .get(&admin(), &ids("otaa"), &paths(&["session.started_at"]))
        .await
        .unwrap();
    assert_eq!(got.session.unwrap().started_at, first);
    assert_eq!(kept.session.unwrap().last_f_cnt_up, 42);

    // A new key identifier restarts it
    let mut dev = EndDevice::new(ids("otaa"));
    dev.session = Some(Session {
        keys: joined_keys(b"session-2"),
        ..session
    });
    env.create(dev, &["session.keys"]).await.unwrap();
    let got = env
        .registry
        .get(&admin(), &ids("otaa"), &paths(&["session.started_at"]))
        .await
        .unwrap();
    assert_ne!(got.session.unwrap().started_at, first);
}

#[tokio::test]
async fn test_reset_factory_defaults_keeps_abp_session() {
    let env = Env::new();
    let mut dev = abp_device("abp", MacVersion::V1_0_3);
    if let Some(session) = dev.session.as_mut() {
        session.last_f_cnt_up = 17;
        session.queued_application_downlinks = downlinks(5);
    }
    let mut set = ABP_PATHS.to_vec();
    set.extend(["session.last_f_cnt_up", "session.queued_application_downlinks"]);
    env.create(dev, &set).await.unwrap();

    let mut dev = EndDevice::new(ids("abp"));
    let (power_state, battery) = from_battery_level(128);
    dev.power_state = power_state;
    dev.battery_percentage = battery.map(|value| Val { value });
    dev.downlink_margin = 7;
    env.create(dev, &["battery_percentage", "downlink_margin", "power_state"])
        .await
        .unwrap();

    let reset = env
        .registry
        .reset_factory_defaults(
            &admin(),
            &ids("abp"),
            &paths(&["battery_percentage", "downlink_margin", "mac_state", "power_state", "session"]),
        )
        .await
        .unwrap();
    assert_eq!(reset.battery_percentage, None);
    assert_eq!(reset.downlink_margin, 0);
    assert_eq!(reset.power_state, PowerState::Unknown);
    assert_eq!(reset.mac_state.unwrap().lorawan_version, Some(MacVersion::V1_0_3));
    let session = reset.session.unwrap();
    assert_eq!(session.queued_application_downlinks, downlinks(5));
    assert_eq!(session.dev_addr, Some(dev_addr()));
    assert_eq!(session.keys.f_nwk_s_int_key, plain(0x11));
    assert_eq!(session.last_f_cnt_up, 0);
    assert!(session.started_at.is_some());
}

#[tokio::test]
async fn test_reset_factory_defaults_drops_otaa_session() {
    let env = Env::new();
    env.create(otaa_device("otaa"), OTAA_PATHS).await.unwrap();
    let mut dev = EndDevice::new(ids("otaa"));
    dev.session = Some(Session::new(dev_addr(), joined_keys(b"session-1")));
    env.create(dev, &["session"]).await.unwrap();

    let reset = env
        .registry
        .reset_factory_defaults(&admin(), &ids("otaa"), &paths(&["mac_state", "session"]))
        .await
        .unwrap();
    assert_eq!(reset.session, None);
    assert_eq!(reset.mac_state, None);

    let err = env
        .registry
        .reset_factory_defaults(&admin(), &ids("nope"), &paths(&["session"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::NotFound { .. });
}

#[tokio::test]
async fn test_reset_factory_defaults_without_session_is_corrupted() {
    let env = Env::new();
    let mut dev = abp_device("abp", MacVersion::V1_0_3);
    dev.session = None;
    env.registry
        .devices()
        .set_by_id(&ids("abp"), &paths(&["ids"]), |_| {
            Ok(Some((dev.clone(), paths(&["frequency_plan_id", "ids", "lorawan_version"]))))
        })
        .await
        .unwrap();

    let err = env
        .registry
        .reset_factory_defaults(&admin(), &ids("abp"), &paths(&["session"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::CorruptedMacState { source } if matches!(*source, Error::MissingSession));
}

#[tokio::test]
async fn test_delete_and_batch_delete() {
    let env = Env::new();
    for id in ["a", "b", "c"] {
        env.create(abp_device(id, MacVersion::V1_0_3), ABP_PATHS)
            .await
            .unwrap();
    }
    env.events.clear();

    env.registry.delete(&admin(), &ids("a")).await.unwrap();
    let err = env.registry.delete(&admin(), &ids("a")).await.unwrap_err();
    assert_matches!(err, Error::NotFound { .. });

    let deleted = env
        .registry
        .batch_delete(&admin(), APP, &["a".into(), "b".into(), "c".into()])
        .await
        .unwrap();
    let deleted: Vec<_> = deleted.into_iter().map(|ids| ids.device_id).collect();
    assert_eq!(deleted, vec!["b", "c"]);
    assert_eq!(
        env.events.names(),
        vec![EVT_DELETE_END_DEVICE, EVT_BATCH_DELETE_END_DEVICES]
    );
    assert_eq!(env.events.events()[1].identifiers.len(), 2);

    let (devices, total) = env
        .registry
        .devices()
        .range_by_application(APP, &paths(&["ids"]), 0, 1)
        .await
        .unwrap();
    assert!(devices.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_range_by_application_pages() {
    let env = Env::new();
    for id in ["d", "a", "c", "b"] {
        env.create(abp_device(id, MacVersion::V1_0_3), ABP_PATHS)
            .await
            .unwrap();
    }
    let (devices, total) = env
        .registry
        .devices()
        .range_by_application(APP, &paths(&["ids.device_id"]), 3, 1)
        .await
        .unwrap();
    assert_eq!(total, 4);
    let ids: Vec<_> = devices.iter().map(|d| d.ids.device_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_rights() {
    let env = Env::new();
    env.create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();

    let reader = AuthInfo::new().with_rights(APP, Rights::DEVICES_READ);
    env.registry
        .get(&reader, &ids("abp"), &paths(&["frequency_plan_id", "session.dev_addr"]))
        .await
        .unwrap();
    let err = env
        .registry
        .get(&reader, &ids("abp"), &paths(&["session.keys.f_nwk_s_int_key.key"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::PermissionDenied { missing } if missing.contains("DEVICES_READ_KEYS"));
    let err = env
        .registry
        .get(&reader, &ids("abp"), &paths(&["session.queued_application_downlinks"]))
        .await
        .unwrap_err();
    assert_matches!(err, Error::PermissionDenied { missing } if missing.contains("TRAFFIC_READ"));

    let writer = AuthInfo::new().with_rights(APP, Rights::DEVICES_WRITE);
    let err = env
        .registry
        .set(
            &writer,
            SetEndDeviceRequest::new(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS),
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::PermissionDenied { missing } if missing.contains("DEVICES_WRITE_KEYS"));

    let other = AuthInfo::new().with_rights("other-app", Rights::all());
    let err = env.registry.delete(&other, &ids("abp")).await.unwrap_err();
    assert_matches!(err, Error::PermissionDenied { .. });
}

#[tokio::test]
async fn test_conflicting_writes_are_retried() {
    let store = Arc::new(InterferingStore::new());
    let env = Env::with_store(store.clone());
    env.create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();

    let mut dev = EndDevice::new(ids("abp"));
    dev.downlink_margin = 3;
    store.interfere(2);
    store.reads.store(0, Ordering::SeqCst);
    env.create(dev.clone(), &["downlink_margin"]).await.unwrap();
    assert_eq!(store.reads.load(Ordering::SeqCst), 3);

    dev.downlink_margin = 4;
    store.interfere(3);
    let err = env.create(dev, &["downlink_margin"]).await.unwrap_err();
    assert_matches!(err, Error::Conflict { .. });

    let got = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["downlink_margin"]))
        .await
        .unwrap();
    assert_eq!(got.downlink_margin, 3);
}

#[tokio::test]
async fn test_concurrent_writes_are_serialized() {
    let env = Env::new();
    env.create(abp_device("abp", MacVersion::V1_0_3), ABP_PATHS)
        .await
        .unwrap();
    env.events.clear();

    let write = |margin: i32| {
        let mut dev = EndDevice::new(ids("abp"));
        dev.downlink_margin = margin;
        env.create(dev, &["downlink_margin"])
    };
    let (a, b) = tokio::join!(write(1), write(2));
    a.unwrap();
    b.unwrap();

    let got = env
        .registry
        .get(&admin(), &ids("abp"), &paths(&["downlink_margin"]))
        .await
        .unwrap();
    assert!([1, 2].contains(&got.downlink_margin));
    assert_eq!(
        env.events.names(),
        vec![EVT_UPDATE_END_DEVICE, EVT_UPDATE_END_DEVICE]
    );
}
