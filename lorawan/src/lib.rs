//! LoRaWAN Network Server end device registry
//!
//! This crate stores LoRaWAN end devices and MAC settings profiles on behalf
//! of a Network Server. Every write names the fields it touches with a field
//! mask and is checked against the stored record inside an optimistic
//! transaction.
//!
//! # Features
//! - Field-mask reads and writes over the [`device::EndDevice`] record
//! - Implication rules between fields, resolved against the stored record
//! - Band and frequency plan checks of MAC settings
//! - Network session keys wrapped under a key encryption key at rest
//! - MAC settings profiles shared between devices
//! - Create, update and delete events
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use lorawan_ns::{
//!     config::Config,
//!     crypto::MemKeyVault,
//!     device::{EndDevice, EndDeviceIdentifiers},
//!     events::BroadcastPublisher,
//!     lorawan::StaticPlanStore,
//!     registry::{DeviceStore, EndDeviceRegistry, ProfileStore, SetEndDeviceRequest},
//!     rights::{AuthInfo, Rights},
//!     store::MemoryStore,
//! };
//!
//! # async fn run() -> lorawan_ns::error::Result<()> {
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::new());
//! let registry = EndDeviceRegistry::new(
//!     &config,
//!     DeviceStore::new(store.clone(), config.registry.clone()),
//!     ProfileStore::new(store, config.registry.clone()),
//!     Arc::new(StaticPlanStore::with_builtin()),
//!     Arc::new(MemKeyVault::new([("ns", vec![0; 16])])),
//!     Arc::new(BroadcastPublisher::new(16)),
//! );
//!
//! let auth = AuthInfo::new().with_rights("app", Rights::all());
//! let dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
//! registry
//!     .set(&auth, SetEndDeviceRequest::new(dev, &["ids"]))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Registry configuration
pub mod config;

/// Key wrapping and key vaults
pub mod crypto;

/// End device record
pub mod device;

/// Error types
pub mod error;

/// Registry events
pub mod events;

/// LoRaWAN protocol parameters
pub mod lorawan;

/// Field-mask projection of records
pub mod mask;

/// Field paths and path sets
pub mod path;

/// Registry calls
pub mod registry;

/// Caller rights
pub mod rights;

/// Field-mask transaction state
pub mod state;

/// Versioned key-value storage
pub mod store;

/// Set request validation
pub mod validate;
