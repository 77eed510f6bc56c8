use serde::{Deserialize, Serialize};

/// Regional parameters version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhyVersion {
    /// LoRaWAN 1.0
    #[serde(rename = "PHY_V1_0")]
    V1_0,
    /// LoRaWAN 1.0.1
    #[serde(rename = "PHY_V1_0_1")]
    V1_0_1,
    /// LoRaWAN 1.0.2 revision A
    #[serde(rename = "PHY_V1_0_2_REV_A")]
    V1_0_2RevA,
    /// LoRaWAN 1.0.2 revision B
    #[serde(rename = "PHY_V1_0_2_REV_B")]
    V1_0_2RevB,
    /// LoRaWAN 1.1 revision A
    #[serde(rename = "PHY_V1_1_REV_A")]
    V1_1RevA,
    /// LoRaWAN 1.1 revision B
    #[serde(rename = "PHY_V1_1_REV_B")]
    V1_1RevB,
    /// RP001 1.0.3 revision A
    #[serde(rename = "RP001_V1_0_3_REV_A")]
    Rp001V1_0_3RevA,
    /// RP002 1.0.0
    #[serde(rename = "RP002_V1_0_0")]
    Rp002V1_0_0,
    /// RP002 1.0.1
    #[serde(rename = "RP002_V1_0_1")]
    Rp002V1_0_1,
    /// RP002 1.0.2
    #[serde(rename = "RP002_V1_0_2")]
    Rp002V1_0_2,
    /// RP002 1.0.3
    #[serde(rename = "RP002_V1_0_3")]
    Rp002V1_0_3,
    /// RP002 1.0.4
    #[serde(rename = "RP002_V1_0_4")]
    Rp002V1_0_4,
}

/// Regional receive window timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    /// RX1 delay in seconds
    pub rx1_delay: u32,
    /// RX2 delay in seconds
    pub rx2_delay: u32,
    /// Join accept delay 1 in seconds
    pub join_accept_delay1: u32,
    /// Join accept delay 2 in seconds
    pub join_accept_delay2: u32,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            rx1_delay: 1,
            rx2_delay: 2,
            join_accept_delay1: 5,
            join_accept_delay2: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phy_version_names() {
        let v: PhyVersion = serde_json::from_str("\"RP002_V1_0_3\"").unwrap();
        assert_eq!(v, PhyVersion::Rp002V1_0_3);
        assert!(serde_json::from_str::<PhyVersion>("\"PHY_V9\"").is_err());
        assert!(PhyVersion::V1_0 < PhyVersion::Rp002V1_0_4);
    }
}
