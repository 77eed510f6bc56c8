//! MAC settings profiles

use std::sync::Arc;

use tracing::debug;

use super::{decode, encode, log_registry_error, paginate};
use crate::config::RegistryConfig;
use crate::device::ids::MacSettingsProfileIdentifiers;
use crate::device::MacSettingsProfile;
use crate::error::{Error, Result};
use crate::mask;
use crate::path::{FieldPath, PathSet};
use crate::rights::{AuthInfo, Rights};
use crate::store::{locked_watch, BlobStore, Op};

const ENTITY: &str = "MAC settings profile";

/// Paths of a whole profile
pub const PROFILE_PATHS: [&str; 2] = ["ids", "mac_settings"];

fn uid_key(uid: &str) -> String {
    format!("ns:profiles:uid:{}", uid)
}

fn application_key(application_id: &str) -> String {
    format!("ns:profiles:application:{}", application_id)
}

fn check_identifiers(profile: &MacSettingsProfile, ids: &MacSettingsProfileIdentifiers) -> Result<()> {
    if profile.ids != *ids {
        return Err(Error::InvalidIdentifiers);
    }
    Ok(())
}

/// MAC settings profile records over a [`BlobStore`]
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn BlobStore>,
    config: RegistryConfig,
}

impl ProfileStore {
    /// Store over `store`
    pub fn new(store: Arc<dyn BlobStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Fields `paths` of the profile `ids`
    pub async fn get(&self, ids: &MacSettingsProfileIdentifiers, paths: &PathSet) -> Result<MacSettingsProfile> {
        let (value, _) = self
            .store
            .get(&uid_key(&ids.uid()))
            .await?
            .ok_or(Error::NotFound { entity: ENTITY })?;
        mask::filtered(&decode::<MacSettingsProfile>(&value)?, paths)
    }

    /// Create, update or delete the profile `ids` in one transaction
    ///
    /// Same contract as [`super::DeviceStore::set_by_id`]; `f` sees the stored
    /// profile filtered to `paths`.
    pub async fn set<F>(
        &self,
        ids: &MacSettingsProfileIdentifiers,
        paths: &PathSet,
        mut f: F,
    ) -> Result<Option<MacSettingsProfile>>
    where
        F: FnMut(Option<&MacSettingsProfile>) -> Result<Option<(MacSettingsProfile, PathSet)>>,
    {
        if ids.application_ids.application_id.is_empty() || ids.profile_id.is_empty() {
            return Err(Error::InvalidIdentifiers);
        }
        let key = uid_key(&ids.uid());
        let index = application_key(&ids.application_ids.application_id);
        locked_watch(&*self.store, &key, &self.config, |value| {
            let stored = value.map(decode::<MacSettingsProfile>).transpose()?;
            let current = stored.as_ref().map(|s| mask::filtered(s, paths)).transpose()?;
            let Some((profile, sets)) = f(current.as_ref())? else {
                if stored.is_none() {
                    return Ok((Vec::new(), None));
                }
                let ops = vec![
                    Op::Delete { key: key.clone() },
                    Op::RemoveMember {
                        set: index.clone(),
                        member: ids.profile_id.clone(),
                    },
                ];
                return Ok((ops, None));
            };
            if sets.is_empty() {
                return Ok((Vec::new(), current));
            }
            check_identifiers(&profile, ids)?;

            let mut ops = Vec::with_capacity(2);
            let updated = match &stored {
                None => {
                    if let Some(missing) = ["ids.application_ids", "ids.profile_id"]
                        .iter()
                        .find(|p| !sets.has_field(&FieldPath::parse(p)))
                    {
                        return Err(Error::InvalidFieldMask {
                            field: missing.to_string(),
                        });
                    }
                    ops.push(Op::AddMember {
                        set: index.clone(),
                        member: ids.profile_id.clone(),
                    });
                    mask::set_fields(&MacSettingsProfile::default(), &profile, &sets)?
                }
                Some(stored) => mask::set_fields(stored, &profile, &sets)?,
            };
            check_identifiers(&updated, ids)?;
            ops.push(Op::Set {
                key: key.clone(),
                value: encode(&updated)?,
            });
            Ok((ops, Some(mask::filtered(&updated, paths)?)))
        })
        .await
    }

    /// Profiles of `application_id` sorted by profile identifier, with the total count
    pub async fn list(
        &self,
        application_id: &str,
        paths: &PathSet,
        limit: usize,
        page: usize,
    ) -> Result<(Vec<MacSettingsProfile>, usize)> {
        let members = self.store.members(&application_key(application_id)).await?;
        let mut out = Vec::new();
        for profile_id in paginate(&members, limit, page) {
            let ids = MacSettingsProfileIdentifiers::new(application_id, profile_id.as_str());
            match self.get(&ids, paths).await {
                Ok(profile) => out.push(profile),
                Err(Error::NotFound { .. }) => debug!(uid = %ids.uid(), "Indexed profile not found"),
                Err(err) => return Err(err),
            }
        }
        Ok((out, members.len()))
    }
}

/// RPC surface over MAC settings profiles
#[derive(Clone)]
pub struct MacSettingsProfileRegistry {
    profiles: ProfileStore,
    default_limit: usize,
}

impl MacSettingsProfileRegistry {
    /// Registry over `profiles`; list calls without a limit use `default_limit`
    pub fn new(profiles: ProfileStore, default_limit: usize) -> Self {
        Self {
            profiles,
            default_limit,
        }
    }

    fn paths_or_default(paths: Option<PathSet>) -> PathSet {
        paths.unwrap_or_else(|| PathSet::from_strs(&PROFILE_PATHS))
    }

    /// Create `profile`, failing when it exists
    pub async fn create(&self, auth: &AuthInfo, profile: MacSettingsProfile) -> Result<MacSettingsProfile> {
        auth.require(&profile.ids.application_ids.application_id, Rights::DEVICES_WRITE)?;
        debug!(uid = %profile.ids.uid(), "Create MAC settings profile");
        let paths = PathSet::from_strs(&PROFILE_PATHS);
        let ids = profile.ids.clone();
        let res = self
            .profiles
            .set(&ids, &paths, |stored| {
                if stored.is_some() {
                    return Err(Error::AlreadyExists { entity: ENTITY });
                }
                Ok(Some((profile.clone(), paths.clone())))
            })
            .await
            .and_then(|p| p.ok_or(Error::NotFound { entity: ENTITY }));
        res.map_err(|err| {
            log_registry_error(&err, "Failed to create MAC settings profile");
            err
        })
    }

    /// Fields `paths` of the profile `ids`, the whole profile by default
    pub async fn get(
        &self,
        auth: &AuthInfo,
        ids: &MacSettingsProfileIdentifiers,
        paths: Option<PathSet>,
    ) -> Result<MacSettingsProfile> {
        auth.require(&ids.application_ids.application_id, Rights::DEVICES_READ)?;
        debug!(uid = %ids.uid(), "Get MAC settings profile");
        self.profiles
            .get(ids, &Self::paths_or_default(paths))
            .await
            .map_err(|err| {
                log_registry_error(&err, "Failed to get MAC settings profile");
                err
            })
    }

    /// Write fields `paths` of `profile`, failing when it does not exist
    pub async fn update(
        &self,
        auth: &AuthInfo,
        profile: MacSettingsProfile,
        paths: Option<PathSet>,
    ) -> Result<MacSettingsProfile> {
        auth.require(&profile.ids.application_ids.application_id, Rights::DEVICES_WRITE)?;
        debug!(uid = %profile.ids.uid(), paths = ?paths, "Update MAC settings profile");
        let paths = Self::paths_or_default(paths);
        let ids = profile.ids.clone();
        let res = self
            .profiles
            .set(&ids, &paths, |stored| {
                if stored.is_none() {
                    return Err(Error::NotFound { entity: ENTITY });
                }
                Ok(Some((profile.clone(), paths.clone())))
            })
            .await
            .and_then(|p| p.ok_or(Error::NotFound { entity: ENTITY }));
        res.map_err(|err| {
            log_registry_error(&err, "Failed to update MAC settings profile");
            err
        })
    }

    /// Delete the profile `ids`
    pub async fn delete(&self, auth: &AuthInfo, ids: &MacSettingsProfileIdentifiers) -> Result<()> {
        auth.require(&ids.application_ids.application_id, Rights::DEVICES_WRITE)?;
        debug!(uid = %ids.uid(), "Delete MAC settings profile");
        self.profiles
            .set(ids, &PathSet::from_strs(&PROFILE_PATHS), |stored| match stored {
                None => Err(Error::NotFound { entity: ENTITY }),
                Some(_) => Ok(None),
            })
            .await
            .map(|_| ())
            .map_err(|err| {
                log_registry_error(&err, "Failed to delete MAC settings profile");
                err
            })
    }

    /// Profiles of `application_id` with the total count
    pub async fn list(
        &self,
        auth: &AuthInfo,
        application_id: &str,
        paths: Option<PathSet>,
        limit: usize,
        page: usize,
    ) -> Result<(Vec<MacSettingsProfile>, usize)> {
        auth.require(application_id, Rights::DEVICES_READ)?;
        debug!(application_id, limit, page, "List MAC settings profiles");
        let limit = if limit == 0 { self.default_limit } else { limit };
        self.profiles
            .list(application_id, &Self::paths_or_default(paths), limit, page)
            .await
            .map_err(|err| {
                log_registry_error(&err, "Failed to list MAC settings profiles");
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MacSettings, Val};
    use crate::store::MemoryStore;

    fn registry() -> MacSettingsProfileRegistry {
        let store = ProfileStore::new(Arc::new(MemoryStore::new()), RegistryConfig::default());
        MacSettingsProfileRegistry::new(store, 0)
    }

    fn profile(id: &str, rx1_delay: u32) -> MacSettingsProfile {
        MacSettingsProfile {
            ids: MacSettingsProfileIdentifiers::new("app", id),
            mac_settings: Some(MacSettings {
                rx1_delay: Val::some(rx1_delay),
                ..Default::default()
            }),
        }
    }

    fn auth() -> AuthInfo {
        AuthInfo::new().with_rights("app", Rights::DEVICES_READ | Rights::DEVICES_WRITE)
    }

    #[tokio::test]
    async fn test_profile_lifecycle() {
        let reg = registry();
        let auth = auth();
        reg.create(&auth, profile("p1", 1)).await.unwrap();
        assert!(matches!(
            reg.create(&auth, profile("p1", 2)).await,
            Err(Error::AlreadyExists { .. })
        ));

        let updated = reg.update(&auth, profile("p1", 3), None).await.unwrap();
        assert_eq!(updated.mac_settings.unwrap().rx1_delay, Val::some(3));
        assert!(matches!(
            reg.update(&auth, profile("p2", 3), None).await,
            Err(Error::NotFound { .. })
        ));

        reg.create(&auth, profile("p0", 5)).await.unwrap();
        let (profiles, total) = reg.list(&auth, "app", None, 0, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(profiles[0].ids.profile_id, "p0");

        let ids = MacSettingsProfileIdentifiers::new("app", "p1");
        reg.delete(&auth, &ids).await.unwrap();
        assert!(matches!(reg.get(&auth, &ids, None).await, Err(Error::NotFound { .. })));
        assert!(matches!(reg.delete(&auth, &ids).await, Err(Error::NotFound { .. })));
        assert_eq!(reg.list(&auth, "app", None, 0, 0).await.unwrap().1, 1);
    }

    #[tokio::test]
    async fn test_rights_required() {
        let reg = registry();
        let read_only = AuthInfo::new().with_rights("app", Rights::DEVICES_READ);
        assert!(matches!(
            reg.create(&read_only, profile("p1", 1)).await,
            Err(Error::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_field_mask() {
        let reg = registry();
        let auth = auth();
        reg.create(&auth, profile("p1", 4)).await.unwrap();
        let ids = MacSettingsProfileIdentifiers::new("app", "p1");
        let got = reg
            .get(&auth, &ids, Some(PathSet::from_strs(&["ids"])))
            .await
            .unwrap();
        assert_eq!(got.ids, ids);
        assert!(got.mac_settings.is_none());
    }
}
