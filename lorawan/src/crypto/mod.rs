//! Key material protection
//!
//! This module keeps session keys encrypted at rest:
//! - AES key wrap (RFC 3394) with 128 or 256-bit key encryption keys
//! - Wrapping and unwrapping of key envelopes through a [`KeyVault`]
//! - Selective unwrapping of the session keys a caller asked for

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256, Block};
use tracing::error;
use zeroize::Zeroizing;

use crate::device::{AesKey, KeyEnvelope, SessionKeys};
use crate::error::{Error, Result};
use crate::path::{FieldPath, PathSet};

/// Key vault trait and in-memory implementation
pub mod vault;

pub use vault::{KeyVault, MemKeyVault};

/// Size of a wrapping semiblock
const SEMIBLOCK_SIZE: usize = 8;

/// Default initial value of RFC 3394
const WRAP_IV: [u8; SEMIBLOCK_SIZE] = [0xA6; SEMIBLOCK_SIZE];

/// Names of the session keys inside a `keys` record
pub const SESSION_KEY_NAMES: [&str; 4] = [
    "f_nwk_s_int_key",
    "s_nwk_s_int_key",
    "nwk_s_enc_key",
    "app_s_key",
];

enum Kek {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl Kek {
    fn new(kek: &[u8]) -> Result<Self> {
        let invalid = |_| Error::KeyWrap {
            reason: "invalid KEK length",
        };
        match kek.len() {
            16 => Aes128::new_from_slice(kek).map(Kek::Aes128).map_err(invalid),
            32 => Aes256::new_from_slice(kek).map(Kek::Aes256).map_err(invalid),
            _ => Err(Error::KeyWrap {
                reason: "invalid KEK length",
            }),
        }
    }

    fn encrypt(&self, block: &mut Block) {
        match self {
            Kek::Aes128(c) => c.encrypt_block(block),
            Kek::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut Block) {
        match self {
            Kek::Aes128(c) => c.decrypt_block(block),
            Kek::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// Wrap `plaintext` with `kek` (RFC 3394)
///
/// # Arguments
/// * `plaintext` - Key to wrap, a multiple of 8 bytes and at least 16
/// * `kek` - Key encryption key, 16 or 32 bytes
pub fn wrap_key(plaintext: &[u8], kek: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() < 2 * SEMIBLOCK_SIZE || plaintext.len() % SEMIBLOCK_SIZE != 0 {
        return Err(Error::KeyWrap {
            reason: "invalid plaintext length",
        });
    }
    let cipher = Kek::new(kek)?;
    let n = plaintext.len() / SEMIBLOCK_SIZE;

    let mut a = WRAP_IV;
    let mut r = Zeroizing::new(plaintext.to_vec());
    let mut block = Block::default();
    for j in 0..6 {
        for i in 0..n {
            let ri = &mut r[i * SEMIBLOCK_SIZE..(i + 1) * SEMIBLOCK_SIZE];
            block[..SEMIBLOCK_SIZE].copy_from_slice(&a);
            block[SEMIBLOCK_SIZE..].copy_from_slice(ri);
            cipher.encrypt(&mut block);
            let t = ((n * j + i + 1) as u64).to_be_bytes();
            for (k, b) in a.iter_mut().enumerate() {
                *b = block[k] ^ t[k];
            }
            ri.copy_from_slice(&block[SEMIBLOCK_SIZE..]);
        }
    }

    let mut out = Vec::with_capacity(plaintext.len() + SEMIBLOCK_SIZE);
    out.extend_from_slice(&a);
    out.extend_from_slice(&r);
    Ok(out)
}

/// Unwrap `ciphertext` with `kek` (RFC 3394)
///
/// # Arguments
/// * `ciphertext` - Wrapped key, a multiple of 8 bytes and at least 24
/// * `kek` - Key encryption key, 16 or 32 bytes
pub fn unwrap_key(ciphertext: &[u8], kek: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < 3 * SEMIBLOCK_SIZE || ciphertext.len() % SEMIBLOCK_SIZE != 0 {
        return Err(Error::KeyWrap {
            reason: "invalid ciphertext length",
        });
    }
    let cipher = Kek::new(kek)?;
    let n = ciphertext.len() / SEMIBLOCK_SIZE - 1;

    let mut a = [0u8; SEMIBLOCK_SIZE];
    a.copy_from_slice(&ciphertext[..SEMIBLOCK_SIZE]);
    let mut r = Zeroizing::new(ciphertext[SEMIBLOCK_SIZE..].to_vec());
    let mut block = Block::default();
    for j in (0..6).rev() {
        for i in (0..n).rev() {
            let ri = &mut r[i * SEMIBLOCK_SIZE..(i + 1) * SEMIBLOCK_SIZE];
            let t = ((n * j + i + 1) as u64).to_be_bytes();
            for k in 0..SEMIBLOCK_SIZE {
                block[k] = a[k] ^ t[k];
            }
            block[SEMIBLOCK_SIZE..].copy_from_slice(ri);
            cipher.decrypt(&mut block);
            a.copy_from_slice(&block[..SEMIBLOCK_SIZE]);
            ri.copy_from_slice(&block[SEMIBLOCK_SIZE..]);
        }
    }
    if a != WRAP_IV {
        return Err(Error::KeyWrap {
            reason: "integrity check failed",
        });
    }
    Ok(r)
}

/// Envelope for `key`, wrapped with the KEK under `kek_label`
///
/// An empty label yields a plaintext envelope.
pub async fn wrap_aes128_key(
    key: &AesKey,
    kek_label: &str,
    vault: &dyn KeyVault,
) -> Result<KeyEnvelope> {
    if kek_label.is_empty() {
        return Ok(KeyEnvelope::plain(*key));
    }
    let kek = vault.key(kek_label).await.map_err(|err| {
        error!(kek_label, error = %err, "Failed to fetch KEK");
        err
    })?;
    Ok(KeyEnvelope::Wrapped {
        encrypted_key: wrap_key(key.as_bytes(), &kek)?,
        kek_label: kek_label.to_string(),
    })
}

/// Plaintext key of `envelope`
pub async fn unwrap_aes128_key(envelope: &KeyEnvelope, vault: &dyn KeyVault) -> Result<AesKey> {
    let (encrypted_key, kek_label) = match envelope {
        KeyEnvelope::Plain { key } => return Ok(*key),
        KeyEnvelope::Wrapped {
            encrypted_key,
            kek_label,
        } => (encrypted_key, kek_label),
    };
    let kek = vault.key(kek_label).await.map_err(|err| {
        error!(kek_label = %kek_label, error = %err, "Failed to fetch KEK");
        err
    })?;
    let key = unwrap_key(encrypted_key, &kek)?;
    let bytes: [u8; 16] = key.as_slice().try_into().map_err(|_| Error::KeyWrap {
        reason: "unwrapped key is not 128 bits",
    })?;
    Ok(AesKey::from(bytes))
}

/// Envelope slot of session key `name`
pub fn session_key_mut<'a>(keys: &'a mut SessionKeys, name: &str) -> Option<&'a mut Option<KeyEnvelope>> {
    match name {
        "f_nwk_s_int_key" => Some(&mut keys.f_nwk_s_int_key),
        "s_nwk_s_int_key" => Some(&mut keys.s_nwk_s_int_key),
        "nwk_s_enc_key" => Some(&mut keys.nwk_s_enc_key),
        "app_s_key" => Some(&mut keys.app_s_key),
        _ => None,
    }
}

/// Copy of `keys` with the keys selected by `paths` unwrapped
///
/// A key is selected when `paths` covers `{prefix}.{name}.key`.
pub async fn unwrap_selected_session_keys(
    keys: &SessionKeys,
    vault: &dyn KeyVault,
    prefix: &FieldPath,
    paths: &PathSet,
) -> Result<SessionKeys> {
    let mut out = keys.clone();
    for name in SESSION_KEY_NAMES {
        if !paths.has_field(&prefix.child(name).child("key")) {
            continue;
        }
        let Some(slot) = session_key_mut(&mut out, name) else {
            continue;
        };
        if let Some(envelope) = slot.as_ref() {
            let key = unwrap_aes128_key(envelope, vault)
                .await
                .map_err(|err| Error::invalid_field_with_cause(prefix.child(name), err))?;
            *slot = Some(KeyEnvelope::plain(key));
        }
    }
    Ok(out)
}
