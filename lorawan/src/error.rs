//! Registry error taxonomy
//!
//! Every failure surfaced by the registry is a variant of [`Error`]:
//! - validator rejections always name the offending field path
//! - storage conflicts and lock timeouts are retry signals
//! - vault and codec failures keep their cause attached

use thiserror::Error;

use crate::path::FieldPath;

/// Registry result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Registry error type
#[derive(Debug, Error)]
pub enum Error {
    /// A validator rejected the value at `field`
    #[error("invalid value of field `{field}`")]
    InvalidFieldValue {
        /// Offending field path
        field: String,
        /// Underlying reason, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// Field was expected to be non-zero
    #[error("field `{field}` is zero")]
    FieldIsZero {
        /// Field path
        field: String,
    },

    /// Field was expected to be zero
    #[error("field `{field}` is not zero")]
    FieldNotZero {
        /// Field path
        field: String,
    },

    /// Identifiers in the record disagree with the addressed ones
    #[error("invalid identifiers")]
    InvalidIdentifiers,

    /// Attempt to change an immutable field on update
    #[error("read-only field `{field}`")]
    ReadOnlyField {
        /// Field path
        field: String,
    },

    /// A required path is missing from the field mask
    #[error("field mask must contain `{field}`")]
    InvalidFieldMask {
        /// Missing path
        field: String,
    },

    /// Record does not exist
    #[error("{entity} not found")]
    NotFound {
        /// Kind of record
        entity: &'static str,
    },

    /// Record already exists
    #[error("{entity} already exists")]
    AlreadyExists {
        /// Kind of record
        entity: &'static str,
    },

    /// Stored MAC state is inconsistent with the stored record
    #[error("corrupted MAC state")]
    CorruptedMacState {
        /// Reason
        #[source]
        source: Box<Error>,
    },

    /// Device has no session where one is required
    #[error("missing session")]
    MissingSession,

    /// Caller lacks the listed rights
    #[error("permission denied, missing rights: {missing}")]
    PermissionDenied {
        /// Human readable list of missing rights
        missing: String,
    },

    /// Watched key changed during the transaction
    #[error("transaction conflict on `{key}`")]
    Conflict {
        /// Store key
        key: String,
    },

    /// Lock could not be acquired in time
    #[error("timed out waiting for lock on `{key}`")]
    LockTimeout {
        /// Store key
        key: String,
    },

    /// Key vault has no key with the label
    #[error("KEK with label `{label}` not found")]
    KeyNotFound {
        /// KEK label
        label: String,
    },

    /// Key wrap or unwrap failed
    #[error("key wrap failed: {reason}")]
    KeyWrap {
        /// Reason
        reason: &'static str,
    },

    /// Device band does not match the frequency plan band
    #[error("device band `{device_band_id}` does not match frequency plan band `{plan_band_id}`")]
    BandMismatch {
        /// Band of the device version identifiers
        device_band_id: String,
        /// Band of the frequency plan
        plan_band_id: String,
    },

    /// Frequency plan is not known
    #[error("unknown frequency plan `{id}`")]
    UnknownFrequencyPlan {
        /// Frequency plan identifier
        id: String,
    },

    /// Band has no parameters for the PHY version
    #[error("band `{band_id}` does not support PHY version {version}")]
    UnsupportedPhyVersion {
        /// Band identifier
        band_id: String,
        /// Requested PHY version
        version: String,
    },

    /// Record (de)serialization failed
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Configuration could not be parsed
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected failure inside a transaction body
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Invalid value error for `field` without a cause
    pub fn invalid_field(field: impl ToString) -> Self {
        Error::InvalidFieldValue {
            field: field.to_string(),
            source: None,
        }
    }

    /// Invalid value error for `field` caused by `cause`
    pub fn invalid_field_with_cause(field: impl ToString, cause: Error) -> Self {
        Error::InvalidFieldValue {
            field: field.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Path named by a field-level error, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::InvalidFieldValue { field, .. }
            | Error::FieldIsZero { field }
            | Error::FieldNotZero { field }
            | Error::ReadOnlyField { field }
            | Error::InvalidFieldMask { field } => Some(field),
            _ => None,
        }
    }

    /// Whether the error is a retryable storage conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub(crate) fn field_is_zero(path: &FieldPath) -> Self {
        Error::FieldIsZero {
            field: path.to_string(),
        }
    }

    pub(crate) fn field_not_zero(path: &FieldPath) -> Self {
        Error::FieldNotZero {
            field: path.to_string(),
        }
    }
}
