//! Identifiers and fixed-size byte values
//!
//! EUIs, device addresses and AES keys serialize as upper-case hex strings.
//! The all-zero value serializes as `null`, so a zero identifier and an
//! absent one look the same to field-mask operations.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// All-zero value
            pub const ZERO: Self = Self([0; $len]);

            /// Whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(b: [u8; $len]) -> Self {
                Self(b)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode_upper(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if self.is_zero() {
                    serializer.serialize_none()
                } else {
                    serializer.collect_str(self)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match Option::<String>::deserialize(deserializer)? {
                    None => Ok(Self::ZERO),
                    Some(s) => s.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

hex_bytes!(
    /// 64-bit extended unique identifier
    Eui64,
    8
);

hex_bytes!(
    /// 32-bit device address
    DevAddr,
    4
);

hex_bytes!(
    /// AES-128 key
    AesKey,
    16
);

/// Application identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationIdentifiers {
    /// Application identifier
    pub application_id: String,
}

impl ApplicationIdentifiers {
    /// Identifiers for `application_id`
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }
}

/// End device identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndDeviceIdentifiers {
    /// Owning application
    pub application_ids: ApplicationIdentifiers,
    /// Device identifier, unique within the application
    pub device_id: String,
    /// DevEUI (OTAA and LoRaWAN 1.0.4+ ABP)
    pub dev_eui: Option<Eui64>,
    /// JoinEUI (OTAA)
    pub join_eui: Option<Eui64>,
    /// Address of the active session
    pub dev_addr: Option<DevAddr>,
}

impl EndDeviceIdentifiers {
    /// Identifiers for `device_id` in `application_id`
    pub fn new(application_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            application_ids: ApplicationIdentifiers::new(application_id),
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    /// Unique identifier across applications
    pub fn uid(&self) -> String {
        format!("{}.{}", self.application_ids.application_id, self.device_id)
    }

    /// Whether both parts of the primary key are set
    pub fn is_valid(&self) -> bool {
        !self.application_ids.application_id.is_empty() && !self.device_id.is_empty()
    }
}

/// Device version identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndDeviceVersionIdentifiers {
    /// Brand identifier
    pub brand_id: String,
    /// Model identifier
    pub model_id: String,
    /// Hardware version
    pub hardware_version: String,
    /// Firmware version
    pub firmware_version: String,
    /// Band identifier
    pub band_id: String,
}

/// MAC settings profile identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MacSettingsProfileIdentifiers {
    /// Owning application
    pub application_ids: ApplicationIdentifiers,
    /// Profile identifier, unique within the application
    pub profile_id: String,
}

impl MacSettingsProfileIdentifiers {
    /// Identifiers for `profile_id` in `application_id`
    pub fn new(application_id: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            application_ids: ApplicationIdentifiers::new(application_id),
            profile_id: profile_id.into(),
        }
    }

    /// Unique identifier across applications
    pub fn uid(&self) -> String {
        format!("{}.{}", self.application_ids.application_id, self.profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_serialization() {
        let eui = Eui64([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01]);
        let s = serde_json::to_string(&eui).unwrap();
        assert_eq!(s, "\"70B3D57ED0000001\"");
        assert_eq!(serde_json::from_str::<Eui64>(&s).unwrap(), eui);
        assert_eq!(serde_json::to_string(&DevAddr::ZERO).unwrap(), "null");
    }

    #[test]
    fn test_uid() {
        assert_eq!(EndDeviceIdentifiers::new("app", "dev").uid(), "app.dev");
    }
}
