//! Key envelopes and key bundles
//!
//! A [`KeyEnvelope`] carries exactly one form of a key: plaintext, or an
//! encrypted key together with the label of the KEK that wrapped it. The
//! serialized form exposes `key`, `encrypted_key` and `kek_label` as separate
//! fields so that field masks can address them individually.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ids::AesKey;

/// Plaintext or wrapped key
#[derive(Clone, PartialEq, Eq)]
pub enum KeyEnvelope {
    /// Plaintext key
    Plain {
        /// Key material
        key: AesKey,
    },
    /// Key wrapped by a KEK
    Wrapped {
        /// Wrapped key material
        encrypted_key: Vec<u8>,
        /// Label of the wrapping KEK
        kek_label: String,
    },
}

impl KeyEnvelope {
    /// Plaintext envelope
    pub fn plain(key: AesKey) -> Self {
        KeyEnvelope::Plain { key }
    }

    /// Plaintext key, if not wrapped
    pub fn key(&self) -> Option<&AesKey> {
        match self {
            KeyEnvelope::Plain { key } => Some(key),
            KeyEnvelope::Wrapped { .. } => None,
        }
    }

    /// Wrapped key, if wrapped
    pub fn encrypted_key(&self) -> Option<&[u8]> {
        match self {
            KeyEnvelope::Plain { .. } => None,
            KeyEnvelope::Wrapped { encrypted_key, .. } => Some(encrypted_key),
        }
    }

    /// KEK label (empty for plaintext)
    pub fn kek_label(&self) -> &str {
        match self {
            KeyEnvelope::Plain { .. } => "",
            KeyEnvelope::Wrapped { kek_label, .. } => kek_label,
        }
    }

    /// Whether the envelope holds no usable key material
    pub fn is_zero(&self) -> bool {
        match self {
            KeyEnvelope::Plain { key } => key.is_zero(),
            KeyEnvelope::Wrapped { encrypted_key, .. } => encrypted_key.is_empty(),
        }
    }
}

impl fmt::Debug for KeyEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEnvelope::Plain { .. } => f.write_str("KeyEnvelope::Plain(..)"),
            KeyEnvelope::Wrapped { kek_label, .. } => {
                write!(f, "KeyEnvelope::Wrapped(kek_label={:?})", kek_label)
            }
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct EnvelopeRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<AesKey>,
    #[serde(with = "hex", skip_serializing_if = "Vec::is_empty")]
    encrypted_key: Vec<u8>,
    #[serde(skip_serializing_if = "String::is_empty")]
    kek_label: String,
}

impl EnvelopeRepr {
    fn into_envelope<E: serde::de::Error>(self) -> Result<Option<KeyEnvelope>, E> {
        match (self.key.filter(|k| !k.is_zero()), self.encrypted_key.is_empty()) {
            (Some(_), false) => Err(E::custom(
                "key envelope has both a plaintext and an encrypted key",
            )),
            (Some(key), true) => Ok(Some(KeyEnvelope::Plain { key })),
            (None, false) => Ok(Some(KeyEnvelope::Wrapped {
                encrypted_key: self.encrypted_key,
                kek_label: self.kek_label,
            })),
            (None, true) => Ok(None),
        }
    }
}

impl Serialize for KeyEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            KeyEnvelope::Plain { key } => EnvelopeRepr {
                key: Some(*key),
                ..Default::default()
            },
            KeyEnvelope::Wrapped {
                encrypted_key,
                kek_label,
            } => EnvelopeRepr {
                key: None,
                encrypted_key: encrypted_key.clone(),
                kek_label: kek_label.clone(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        EnvelopeRepr::deserialize(deserializer)?
            .into_envelope()?
            .ok_or_else(|| serde::de::Error::custom("empty key envelope"))
    }
}

/// Deserialize an optional envelope, mapping an empty one to `None`
pub fn deserialize_envelope<'de, D>(deserializer: D) -> Result<Option<KeyEnvelope>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<EnvelopeRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(repr) => repr.into_envelope(),
    }
}

/// Network and application session keys
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionKeys {
    /// Join server session key identifier
    #[serde(with = "hex")]
    pub session_key_id: Vec<u8>,
    /// Forwarding network session integrity key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub f_nwk_s_int_key: Option<KeyEnvelope>,
    /// Serving network session integrity key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub s_nwk_s_int_key: Option<KeyEnvelope>,
    /// Network session encryption key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub nwk_s_enc_key: Option<KeyEnvelope>,
    /// Application session key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub app_s_key: Option<KeyEnvelope>,
}

/// Root keys for OTAA
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootKeys {
    /// Root key identifier
    pub root_key_id: String,
    /// Application key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub app_key: Option<KeyEnvelope>,
    /// Network key
    #[serde(deserialize_with = "deserialize_envelope")]
    pub nwk_key: Option<KeyEnvelope>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_forms() {
        let plain = KeyEnvelope::plain(AesKey([0x11; 16]));
        let v = serde_json::to_value(&plain).unwrap();
        assert_eq!(v, json!({"key": "11111111111111111111111111111111"}));

        let wrapped = KeyEnvelope::Wrapped {
            encrypted_key: vec![0xAB; 24],
            kek_label: "ns".into(),
        };
        let v = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(v["kek_label"], "ns");
        assert!(v.get("key").is_none());
        assert_eq!(serde_json::from_value::<KeyEnvelope>(v).unwrap(), wrapped);
    }

    #[test]
    fn test_envelope_rejects_both_forms() {
        let v = json!({
            "f_nwk_s_int_key": {
                "key": "11111111111111111111111111111111",
                "encrypted_key": "abab",
                "kek_label": "x"
            }
        });
        assert!(serde_json::from_value::<SessionKeys>(v).is_err());
    }

    #[test]
    fn test_empty_envelope_is_absent() {
        let keys: SessionKeys =
            serde_json::from_value(json!({"f_nwk_s_int_key": {"kek_label": ""}})).unwrap();
        assert_eq!(keys.f_nwk_s_int_key, None);
    }
}
