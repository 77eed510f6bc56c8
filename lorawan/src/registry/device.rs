//! Storage-level end device registry

use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::debug;

use super::{decode, encode, paginate};
use crate::config::RegistryConfig;
use crate::device::{EndDevice, EndDeviceIdentifiers, Eui64};
use crate::error::{Error, Result};
use crate::mask;
use crate::path::{FieldPath, PathSet};
use crate::store::{locked_watch, BlobStore, Op};

const ENTITY: &str = "end device";

fn uid_key(uid: &str) -> String {
    format!("ns:devices:uid:{}", uid)
}

fn application_key(application_id: &str) -> String {
    format!("ns:devices:application:{}", application_id)
}

/// Identifier paths a create must write
const CREATE_PATHS: [&str; 2] = ["ids.application_ids", "ids.device_id"];

/// First EUI written by `sets` that differs from the one already stored
fn changed_read_only(stored: &EndDevice, dev: &EndDevice, sets: &PathSet) -> Option<&'static str> {
    let eui = |v: Option<Eui64>| v.filter(|eui| !eui.is_zero());
    [
        ("ids.dev_eui", stored.ids.dev_eui, dev.ids.dev_eui),
        ("ids.join_eui", stored.ids.join_eui, dev.ids.join_eui),
    ]
    .into_iter()
    .find(|(path, old, new)| {
        eui(*old).is_some() && sets.has_field(&FieldPath::parse(path)) && eui(*old) != eui(*new)
    })
    .map(|(path, _, _)| path)
}

fn check_identifiers(dev: &EndDevice, ids: &EndDeviceIdentifiers) -> Result<()> {
    if dev.ids.application_ids != ids.application_ids || dev.ids.device_id != ids.device_id {
        return Err(Error::InvalidIdentifiers);
    }
    Ok(())
}

/// End device records over a [`BlobStore`]
///
/// Each record lives under its own key, next to a per-application index of
/// device identifiers that is updated in the same commit.
#[derive(Clone)]
pub struct DeviceStore {
    store: Arc<dyn BlobStore>,
    config: RegistryConfig,
}

impl DeviceStore {
    /// Registry over `store`
    pub fn new(store: Arc<dyn BlobStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Fields `paths` of the device `ids`
    pub async fn get_by_id(&self, ids: &EndDeviceIdentifiers, paths: &PathSet) -> Result<EndDevice> {
        if !ids.is_valid() {
            return Err(Error::InvalidIdentifiers);
        }
        let (value, _) = self
            .store
            .get(&uid_key(&ids.uid()))
            .await?
            .ok_or(Error::NotFound { entity: ENTITY })?;
        let dev: EndDevice = decode(&value)?;
        mask::filtered(&dev, paths)
    }

    /// Create, update or delete the device `ids` in one transaction
    ///
    /// `f` receives the stored record, if any, and returns the record to
    /// write with the paths to write, or `None` to delete. An empty path set
    /// leaves the record untouched. `f` may run more than once when the
    /// transaction conflicts. The result is the written record filtered to
    /// `gets`, or `None` after a delete.
    pub async fn set_by_id<F>(
        &self,
        ids: &EndDeviceIdentifiers,
        gets: &PathSet,
        mut f: F,
    ) -> Result<Option<EndDevice>>
    where
        F: FnMut(Option<&EndDevice>) -> Result<Option<(EndDevice, PathSet)>>,
    {
        if !ids.is_valid() {
            return Err(Error::InvalidIdentifiers);
        }
        let uid = ids.uid();
        let key = uid_key(&uid);
        let index = application_key(&ids.application_ids.application_id);
        locked_watch(&*self.store, &key, &self.config, |value| {
            let stored = value.map(decode::<EndDevice>).transpose()?;
            let Some((dev, sets)) = f(stored.as_ref())? else {
                let Some(stored) = stored else {
                    return Ok((Vec::new(), None));
                };
                debug!(uid = %uid, "Delete end device");
                let ops = vec![
                    Op::Delete { key: key.clone() },
                    Op::RemoveMember {
                        set: index.clone(),
                        member: stored.ids.device_id,
                    },
                ];
                return Ok((ops, None));
            };
            if sets.is_empty() {
                let out = stored.map(|s| mask::filtered(&s, gets)).transpose()?;
                return Ok((Vec::new(), out));
            }
            check_identifiers(&dev, ids)?;

            let now = Some(Utc::now());
            let mut ops = Vec::with_capacity(2);
            let updated = match &stored {
                None => {
                    if let Some(missing) = CREATE_PATHS
                        .iter()
                        .find(|p| !sets.has_field(&FieldPath::parse(p)))
                    {
                        return Err(Error::InvalidFieldMask {
                            field: missing.to_string(),
                        });
                    }
                    let mut updated = mask::set_fields(&EndDevice::default(), &dev, &sets)?;
                    check_identifiers(&updated, ids)?;
                    updated.created_at = now;
                    updated.updated_at = now;
                    ops.push(Op::AddMember {
                        set: index.clone(),
                        member: ids.device_id.clone(),
                    });
                    updated
                }
                Some(stored) => {
                    if let Some(path) = changed_read_only(stored, &dev, &sets) {
                        return Err(Error::ReadOnlyField {
                            field: path.to_string(),
                        });
                    }
                    let mut updated = mask::set_fields(stored, &dev, &sets)?;
                    updated.updated_at = now;
                    updated
                }
            };
            ops.push(Op::Set {
                key: key.clone(),
                value: encode(&updated)?,
            });
            Ok((ops, Some(mask::filtered(&updated, gets)?)))
        })
        .await
    }

    /// Devices of `application_id` sorted by device identifier, with the total count
    ///
    /// `page` counts from 1; a `limit` of 0 returns every device.
    pub async fn range_by_application(
        &self,
        application_id: &str,
        paths: &PathSet,
        limit: usize,
        page: usize,
    ) -> Result<(Vec<EndDevice>, usize)> {
        let members = self.store.members(&application_key(application_id)).await?;
        let total = members.len();
        let mut out = Vec::new();
        for device_id in paginate(&members, limit, page) {
            let ids = EndDeviceIdentifiers::new(application_id, device_id.as_str());
            match self.store.get(&uid_key(&ids.uid())).await? {
                Some((value, _)) => out.push(mask::filtered(&decode::<EndDevice>(&value)?, paths)?),
                None => debug!(uid = %ids.uid(), "Indexed end device not found"),
            }
        }
        Ok((out, total))
    }

    /// Delete every existing device of `device_ids`, returning the ones removed
    pub async fn batch_delete(
        &self,
        application_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<EndDeviceIdentifiers>> {
        let removals = device_ids.iter().map(|device_id| async move {
            let ids = EndDeviceIdentifiers::new(application_id, device_id.as_str());
            let mut removed = None;
            self.set_by_id(&ids, &PathSet::new(), |stored| {
                removed = stored.map(|s| s.ids.clone());
                Ok(None)
            })
            .await?;
            Ok::<_, Error>(removed)
        });
        let deleted = try_join_all(removals).await?.into_iter().flatten().collect();
        Ok(deleted)
    }
}
