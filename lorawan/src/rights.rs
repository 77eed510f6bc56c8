//! Caller rights

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags! {
    /// Rights a caller holds on an application
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Rights: u8 {
        /// Read device records
        const DEVICES_READ = 1 << 0;
        /// Read plaintext session keys
        const DEVICES_READ_KEYS = 1 << 1;
        /// Write device records
        const DEVICES_WRITE = 1 << 2;
        /// Write session keys
        const DEVICES_WRITE_KEYS = 1 << 3;
        /// Read application traffic
        const TRAFFIC_READ = 1 << 4;
    }
}

/// Rights of the caller, per application
#[derive(Clone, Debug, Default)]
pub struct AuthInfo {
    applications: HashMap<String, Rights>,
}

impl AuthInfo {
    /// Caller without rights
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `rights` on `application_id`
    pub fn with_rights(mut self, application_id: impl Into<String>, rights: Rights) -> Self {
        *self.applications.entry(application_id.into()).or_default() |= rights;
        self
    }

    /// Rights held on `application_id`
    pub fn rights(&self, application_id: &str) -> Rights {
        self.applications.get(application_id).copied().unwrap_or_default()
    }

    /// Fail unless every right of `required` is held on `application_id`
    pub fn require(&self, application_id: &str, required: Rights) -> Result<()> {
        let missing = required - self.rights(application_id);
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::PermissionDenied {
            missing: missing
                .iter_names()
                .map(|(name, _)| name)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}
