//! Network sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DevAddr;
use super::keys::SessionKeys;

/// Active or pending network session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Device address of the session
    pub dev_addr: Option<DevAddr>,
    /// Session keys
    pub keys: SessionKeys,
    /// Last uplink frame counter
    pub last_f_cnt_up: u32,
    /// Last network downlink frame counter
    pub last_n_f_cnt_down: u32,
    /// Last application downlink frame counter
    pub last_a_f_cnt_down: u32,
    /// Frame counter of the last confirmed downlink
    pub last_conf_f_cnt_down: u32,
    /// Session start
    pub started_at: Option<DateTime<Utc>>,
    /// Application downlinks waiting for transmission
    pub queued_application_downlinks: Vec<ApplicationDownlink>,
}

impl Session {
    /// Session with `dev_addr` and `keys`
    pub fn new(dev_addr: DevAddr, keys: SessionKeys) -> Self {
        Self {
            dev_addr: Some(dev_addr),
            keys,
            ..Default::default()
        }
    }
}

/// Queued application downlink
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationDownlink {
    /// Session key identifier the payload is encrypted with
    #[serde(with = "hex")]
    pub session_key_id: Vec<u8>,
    /// Frame port
    pub f_port: u32,
    /// Application frame counter
    pub f_cnt: u32,
    /// Encrypted payload
    #[serde(with = "hex")]
    pub frm_payload: Vec<u8>,
    /// Whether the downlink is confirmed
    pub confirmed: bool,
    /// Correlation identifiers
    pub correlation_ids: Vec<String>,
}
