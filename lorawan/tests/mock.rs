#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use zeroize::Zeroizing;

use lorawan_ns::{
    config::Config,
    crypto::{KeyVault, MemKeyVault},
    device::{
        AesKey, DevAddr, EndDevice, EndDeviceIdentifiers, Eui64, KeyEnvelope, RootKeys, Session,
        SessionKeys,
    },
    error::{Error, Result},
    events::{Event, EventPublisher},
    lorawan::{MacVersion, PhyVersion, StaticPlanStore},
    registry::{
        DeviceStore, EndDeviceRegistry, MacSettingsProfileRegistry, ProfileStore,
        SetEndDeviceRequest,
    },
    rights::{AuthInfo, Rights},
    store::{BlobStore, MemoryStore, Op, Version},
};

pub const APP: &str = "test-app";
pub const KEK_LABEL: &str = "ns-kek";
pub const KEK: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];
pub const FREQUENCY_PLAN: &str = "EU_863_870_TTN";

/// Paths creating an ABP device built by [`abp_device`]
pub const ABP_PATHS: &[&str] = &[
    "frequency_plan_id",
    "lorawan_phy_version",
    "lorawan_version",
    "session.dev_addr",
    "session.keys.f_nwk_s_int_key.key",
    "supports_join",
];

/// Paths creating an OTAA device built by [`otaa_device`]
pub const OTAA_PATHS: &[&str] = &[
    "frequency_plan_id",
    "ids.dev_eui",
    "ids.join_eui",
    "lorawan_phy_version",
    "lorawan_version",
    "root_keys.root_key_id",
    "supports_join",
];

/// Publisher keeping every event
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name).collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Vault without any key
pub struct FailingVault;

#[async_trait]
impl KeyVault for FailingVault {
    async fn key(&self, label: &str) -> Result<Zeroizing<Vec<u8>>> {
        Err(Error::KeyNotFound {
            label: label.to_string(),
        })
    }
}

/// Store rewriting device records behind the reader's back
///
/// Each of the next `interfere` reads of a device record is followed by a
/// write of the same bytes, so the reader's commit conflicts.
pub struct InterferingStore {
    pub inner: MemoryStore,
    interfere: AtomicUsize,
    pub reads: AtomicUsize,
}

impl InterferingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            interfere: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn interfere(&self, times: usize) {
        self.interfere.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for InterferingStore {
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.inner.try_lock(key, token, ttl).await
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        self.inner.unlock(key, token).await
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        let res = self.inner.get(key).await?;
        if key.starts_with("ns:devices:uid:") {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let left = self.interfere.load(Ordering::SeqCst);
            if let (Some((value, _)), true) = (&res, left > 0) {
                self.interfere.store(left - 1, Ordering::SeqCst);
                self.inner.put(key, value);
            }
        }
        Ok(res)
    }

    async fn commit(&self, watches: &[(String, Version)], ops: Vec<Op>) -> Result<()> {
        self.inner.commit(watches, ops).await
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        self.inner.members(set).await
    }
}

/// Log to the test writer, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.device_kek_label = KEK_LABEL.to_string();
    config.registry.lock_wait = Duration::from_millis(500);
    config
}

/// Registry under test with its collaborators
pub struct Env {
    pub registry: EndDeviceRegistry,
    pub profiles: MacSettingsProfileRegistry,
    pub events: Arc<RecordingPublisher>,
    pub vault: Arc<MemKeyVault>,
}

impl Env {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn BlobStore>) -> Self {
        init_tracing();
        let config = config();
        let events = Arc::new(RecordingPublisher::default());
        let vault = Arc::new(MemKeyVault::new([(KEK_LABEL, KEK.to_vec())]));
        let profile_store = ProfileStore::new(store.clone(), config.registry.clone());
        let registry = EndDeviceRegistry::new(
            &config,
            DeviceStore::new(store, config.registry.clone()),
            profile_store.clone(),
            Arc::new(StaticPlanStore::with_builtin()),
            vault.clone(),
            events.clone(),
        );
        Self {
            registry,
            profiles: MacSettingsProfileRegistry::new(
                profile_store,
                config.registry.pagination_default_limit,
            ),
            events,
            vault,
        }
    }

    pub async fn create(&self, dev: EndDevice, paths: &[&str]) -> Result<EndDevice> {
        self.registry
            .set(&admin(), SetEndDeviceRequest::new(dev, paths))
            .await
    }
}

/// Registry over an empty store using `vault` for KEKs
pub fn registry_with_vault(vault: Arc<dyn KeyVault>) -> EndDeviceRegistry {
    let config = config();
    let store: Arc<dyn BlobStore> = Arc::new(MemoryStore::new());
    EndDeviceRegistry::new(
        &config,
        DeviceStore::new(store.clone(), config.registry.clone()),
        ProfileStore::new(store, config.registry.clone()),
        Arc::new(StaticPlanStore::with_builtin()),
        vault,
        Arc::new(RecordingPublisher::default()),
    )
}

/// Caller holding every right on [`APP`]
pub fn admin() -> AuthInfo {
    AuthInfo::new().with_rights(APP, Rights::all())
}

pub fn ids(device_id: &str) -> EndDeviceIdentifiers {
    EndDeviceIdentifiers::new(APP, device_id)
}

pub fn key(byte: u8) -> AesKey {
    AesKey::from([byte; 16])
}

pub fn plain(byte: u8) -> Option<KeyEnvelope> {
    Some(KeyEnvelope::plain(key(byte)))
}

pub fn dev_addr() -> DevAddr {
    DevAddr::from([0x26, 0x01, 0x1f, 0x42])
}

/// ABP device with a session whose forwarding key is `0x11..`
pub fn abp_device(device_id: &str, version: MacVersion) -> EndDevice {
    let mut dev = EndDevice::new(ids(device_id));
    dev.frequency_plan_id = FREQUENCY_PLAN.into();
    dev.lorawan_version = Some(version);
    dev.lorawan_phy_version = Some(PhyVersion::Rp001V1_0_3RevA);
    dev.session = Some(Session::new(
        dev_addr(),
        SessionKeys {
            f_nwk_s_int_key: plain(0x11),
            ..Default::default()
        },
    ));
    dev
}

/// OTAA device that has not joined yet
pub fn otaa_device(device_id: &str) -> EndDevice {
    let mut dev = EndDevice::new(ids(device_id));
    dev.ids.dev_eui = Some(Eui64::from([0x70, 0xb3, 0xd5, 0x7e, 0xd0, 0x00, 0x00, 0x01]));
    dev.ids.join_eui = Some(Eui64::from([0x70, 0xb3, 0xd5, 0x7e, 0xd0, 0x00, 0x00, 0x00]));
    dev.frequency_plan_id = FREQUENCY_PLAN.into();
    dev.lorawan_version = Some(MacVersion::V1_1);
    dev.lorawan_phy_version = Some(PhyVersion::Rp001V1_0_3RevA);
    dev.supports_join = true;
    dev.root_keys = Some(RootKeys {
        root_key_id: "root".into(),
        ..Default::default()
    });
    dev
}

/// Session keys of a LoRaWAN 1.1 join
pub fn joined_keys(session_key_id: &[u8]) -> SessionKeys {
    SessionKeys {
        session_key_id: session_key_id.to_vec(),
        f_nwk_s_int_key: plain(0x21),
        s_nwk_s_int_key: plain(0x22),
        nwk_s_enc_key: plain(0x23),
        app_s_key: None,
    }
}
