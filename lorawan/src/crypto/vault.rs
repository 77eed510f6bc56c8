use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Source of key encryption keys
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Secret stored under `label`
    async fn key(&self, label: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// Key vault holding its keys in memory
#[derive(Default)]
pub struct MemKeyVault {
    keys: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemKeyVault {
    /// Vault seeded with `keys`
    pub fn new<I, L>(keys: I) -> Self
    where
        I: IntoIterator<Item = (L, Vec<u8>)>,
        L: Into<String>,
    {
        Self {
            keys: Mutex::new(
                keys.into_iter()
                    .map(|(label, key)| (label.into(), Zeroizing::new(key)))
                    .collect(),
            ),
        }
    }

    /// Store `key` under `label`, replacing any previous key
    pub fn set_key(&self, label: impl Into<String>, key: Vec<u8>) {
        self.keys.lock().insert(label.into(), Zeroizing::new(key));
    }
}

#[async_trait]
impl KeyVault for MemKeyVault {
    async fn key(&self, label: &str) -> Result<Zeroizing<Vec<u8>>> {
        self.keys
            .lock()
            .get(label)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound {
                label: label.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mem_key_vault() {
        let vault = MemKeyVault::new([("kek", vec![1u8; 16])]);
        assert_eq!(vault.key("kek").await.unwrap().as_slice(), &[1u8; 16]);
        assert!(matches!(
            vault.key("other").await,
            Err(Error::KeyNotFound { label }) if label == "other"
        ));
        vault.set_key("other", vec![2u8; 16]);
        assert!(vault.key("other").await.is_ok());
    }
}
