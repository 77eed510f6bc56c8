//! LoRaWAN protocol parameters
//!
//! This module contains what the registry needs to know about the protocol:
//! - MAC versions and fresh MAC state construction
//! - Regional parameters versions and timing
//! - Bands, frequency plans and their lookup

/// MAC versions and MAC state construction
pub mod mac;

/// Regional parameters versions
pub mod phy;

/// Bands and frequency plans
pub mod region;

pub use mac::{DefaultMacStateBuilder, MacStateBuilder, MacVersion};
pub use phy::{PhyVersion, TimingParams};
pub use region::{Band, FrequencyPlan, FrequencyPlanStore, StaticPlanStore};
