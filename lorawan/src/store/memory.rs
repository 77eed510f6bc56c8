use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{BlobStore, Op, Version};
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    records: HashMap<String, (Vec<u8>, Version)>,
    sets: BTreeMap<String, BTreeSet<String>>,
    locks: HashMap<String, (String, Instant)>,
    version: Version,
}

impl Inner {
    fn version_of(&self, key: &str) -> Version {
        self.records.get(key).map_or(0, |(_, v)| *v)
    }

    fn write(&mut self, key: String, value: Vec<u8>) {
        self.version += 1;
        self.records.insert(key, (value, self.version));
    }
}

/// Blob store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` under `key` outside of any transaction
    pub fn put(&self, key: &str, value: &[u8]) {
        self.inner.lock().write(key.to_string(), value.to_vec());
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.locks.get(key) {
            Some((holder, expiry)) if holder != token && *expiry > now => Ok(false),
            _ => {
                inner.locks.insert(key.to_string(), (token.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.locks.get(key).map_or(false, |(holder, _)| holder == token) {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        Ok(self.inner.lock().records.get(key).cloned())
    }

    async fn commit(&self, watches: &[(String, Version)], ops: Vec<Op>) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some((key, _)) = watches.iter().find(|(key, v)| inner.version_of(key) != *v) {
            return Err(Error::Conflict { key: key.clone() });
        }
        for op in ops {
            match op {
                Op::Set { key, value } => inner.write(key, value),
                Op::Delete { key } => {
                    inner.records.remove(&key);
                }
                Op::AddMember { set, member } => {
                    inner.sets.entry(set).or_default().insert(member);
                }
                Op::RemoveMember { set, member } => {
                    if let Some(members) = inner.sets.get_mut(&set) {
                        members.remove(&member);
                        if members.is_empty() {
                            inner.sets.remove(&set);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}
