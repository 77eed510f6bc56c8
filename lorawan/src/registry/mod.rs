//! End device and MAC settings profile registries
//!
//! The storage-level stores ([`DeviceStore`], [`ProfileStore`]) own the
//! record layout and the transaction driver. The RPC-level registries check
//! caller rights, validate requests and publish events on top of them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Storage-level end device registry
pub mod device;

/// RPC-level end device registry
pub mod endpoint;

/// MAC settings profile store and registry
pub mod profile;

pub use device::DeviceStore;
pub use endpoint::{EndDeviceRegistry, SetEndDeviceRequest};
pub use profile::{MacSettingsProfileRegistry, ProfileStore};

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

pub(crate) fn decode<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(value)?)
}

/// Page `page` (from 1) of `limit` items; a `limit` of 0 selects everything
pub(crate) fn paginate<T>(items: &[T], limit: usize, page: usize) -> &[T] {
    if limit == 0 {
        return items;
    }
    let start = page.max(1).saturating_sub(1).saturating_mul(limit).min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    &items[start..end]
}

/// Log a failed registry call at a level matching its cause
pub(crate) fn log_registry_error(err: &Error, msg: &str) {
    match err {
        Error::InvalidFieldValue { .. }
        | Error::InvalidFieldMask { .. }
        | Error::InvalidIdentifiers
        | Error::ReadOnlyField { .. }
        | Error::NotFound { .. }
        | Error::AlreadyExists { .. }
        | Error::PermissionDenied { .. }
        | Error::Conflict { .. } => warn!(error = %err, "{}", msg),
        _ => error!(error = %err, "{}", msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let items = [1, 2, 3, 4, 5];
        assert_eq!(paginate(&items, 0, 7), &items);
        assert_eq!(paginate(&items, 2, 1), &[1, 2]);
        assert_eq!(paginate(&items, 2, 3), &[5]);
        assert!(paginate(&items, 2, 4).is_empty());
        assert_eq!(paginate(&items, 2, 0), &[1, 2]);
    }
}
