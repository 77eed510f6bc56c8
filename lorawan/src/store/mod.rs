//! Blob storage contract and transaction driver
//!
//! Records are opaque byte blobs under string keys, each carrying a version
//! bumped on every write. A transaction locks one key, reads it, and commits
//! a batch of operations only if none of the keys it read has moved on.
//! Index sets of member strings are written in the same batch as the records
//! they index.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{Error, Result};

/// In-memory store
pub mod memory;

pub use memory::MemoryStore;

/// Record version; 0 means absent
pub type Version = u64;

/// Write operation of a commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Store `value` under `key`
    Set {
        /// Record key
        key: String,
        /// Encoded record
        value: Vec<u8>,
    },
    /// Remove the record under `key`
    Delete {
        /// Record key
        key: String,
    },
    /// Add `member` to the index set `set`
    AddMember {
        /// Index key
        set: String,
        /// Member
        member: String,
    },
    /// Remove `member` from the index set `set`
    RemoveMember {
        /// Index key
        set: String,
        /// Member
        member: String,
    },
}

/// Versioned blob storage with advisory locks
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Take the lock on `key` for `token` unless another live token holds it
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock on `key` if `token` holds it
    async fn unlock(&self, key: &str, token: &str) -> Result<()>;

    /// Record and version under `key`
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, Version)>>;

    /// Apply `ops` atomically if every watched key is still at its version
    ///
    /// Fails with [`Error::Conflict`] otherwise, leaving the store untouched.
    async fn commit(&self, watches: &[(String, Version)], ops: Vec<Op>) -> Result<()>;

    /// Members of the index set `set`, sorted
    async fn members(&self, set: &str) -> Result<Vec<String>>;
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Lock on one key, released through [`LockGuard::release`]
struct LockGuard<'s> {
    store: &'s dyn BlobStore,
    key: &'s str,
    token: String,
}

impl LockGuard<'_> {
    async fn release(self) {
        if let Err(err) = self.store.unlock(self.key, &self.token).await {
            warn!(key = self.key, error = %err, "Failed to release lock");
        }
    }
}

async fn acquire<'s>(
    store: &'s dyn BlobStore,
    key: &'s str,
    config: &RegistryConfig,
) -> Result<LockGuard<'s>> {
    let token = uuid::Uuid::new_v4().to_string();
    let deadline = Instant::now() + config.lock_wait;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if store.try_lock(key, &token, config.lock_ttl).await? {
            return Ok(LockGuard { store, key, token });
        }
        if Instant::now() >= deadline {
            return Err(Error::LockTimeout {
                key: key.to_string(),
            });
        }
        debug!(key, backoff_ms = backoff.as_millis() as u64, "Lock held, backing off");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Run `body` over the record under `key` while holding its lock
///
/// `body` receives the current record and returns the operations to commit
/// along with its result. The read of `key` is watched: when the commit
/// conflicts, `body` runs again over a fresh read, at most
/// `conflict_attempts` times. A panic in `body` becomes [`Error::Internal`].
/// The lock is released on every exit path.
pub async fn locked_watch<T, F>(
    store: &dyn BlobStore,
    key: &str,
    config: &RegistryConfig,
    mut body: F,
) -> Result<T>
where
    F: FnMut(Option<&[u8]>) -> Result<(Vec<Op>, T)>,
{
    let guard = acquire(store, key, config).await?;
    let mut attempt = 0;
    let res = loop {
        attempt += 1;
        let (value, version) = match store.get(key).await {
            Ok(Some((value, version))) => (Some(value), version),
            Ok(None) => (None, 0),
            Err(err) => break Err(err),
        };
        let out = catch_unwind(AssertUnwindSafe(|| body(value.as_deref())))
            .unwrap_or_else(|_| Err(Error::Internal(format!("transaction on `{}` panicked", key))));
        let (ops, out) = match out {
            Ok(v) => v,
            Err(err) => break Err(err),
        };
        if ops.is_empty() {
            break Ok(out);
        }
        match store.commit(&[(key.to_string(), version)], ops).await {
            Ok(()) => break Ok(out),
            Err(err) if err.is_conflict() && attempt < config.conflict_attempts => {
                debug!(key, attempt, "Transaction conflict, retrying");
            }
            Err(err) => break Err(err),
        }
    };
    guard.release().await;
    res
}
