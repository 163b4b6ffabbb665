//! # Controller Configuration & Constants
//!
//! Protocol constants for the ConfidentialP2PEther ledger plus the tunable
//! [`ControllerConfig`]. Every timing knob and numeric ceiling the controller
//! uses is defined here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ledger Constants
// ---------------------------------------------------------------------------

/// Name of the ledger contract, used in status messages.
pub const CONTRACT_NAME: &str = "ConfidentialP2PEther";

/// Default settling delay before a submit operation does any work. Rapid
/// repeated triggers from the presentation layer collapse onto stable inputs.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// Default per-subscription event channel capacity.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Amount width
// ---------------------------------------------------------------------------

/// Bit width of the ledger's encrypted amount field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountWidth {
    /// `euint64` amounts.
    U64,
    /// `euint128` amounts.
    U128,
}

impl AmountWidth {
    /// Number of bits in the field.
    pub fn bits(self) -> u32 {
        match self {
            AmountWidth::U64 => 64,
            AmountWidth::U128 => 128,
        }
    }

    /// Largest cleartext amount the field can hold.
    pub fn ceiling(self) -> u128 {
        match self {
            AmountWidth::U64 => u64::MAX as u128,
            AmountWidth::U128 => u128::MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Tunable parameters for the operation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Settling delay, in milliseconds, before a submit operation encrypts
    /// or submits anything.
    pub settle_delay_ms: u64,

    /// Width of the encrypted amount field. Deposit and transfer amounts
    /// above [`AmountWidth::ceiling`] are rejected before any network call.
    pub amount_width: AmountWidth,

    /// Trigger a background refresh whenever the session changes.
    pub auto_refresh: bool,

    /// Buffer size of each event subscription channel.
    pub event_channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            amount_width: AmountWidth::U128,
            auto_refresh: true,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ControllerConfig {
    /// The settling delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Friendly name for well-known chain ids, mainly for logging.
pub fn network_name(network_id: u64) -> String {
    match network_id {
        1 => "mainnet".to_string(),
        11155111 => "sepolia".to_string(),
        31337 => "hardhat".to_string(),
        other => format!("unknown({})", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_width_ceilings() {
        assert_eq!(AmountWidth::U64.ceiling(), 18_446_744_073_709_551_615);
        assert_eq!(AmountWidth::U128.ceiling(), u128::MAX);
        assert_eq!(AmountWidth::U64.bits(), 64);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ControllerConfig::from_json(r#"{"settle_delay_ms": 5, "amount_width": "u64"}"#)
            .unwrap();
        assert_eq!(cfg.settle_delay(), Duration::from_millis(5));
        assert_eq!(cfg.amount_width, AmountWidth::U64);
        assert!(cfg.auto_refresh);
        assert_eq!(cfg.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn network_name_formatting() {
        assert_eq!(network_name(31337), "hardhat");
        assert_eq!(network_name(42), "unknown(42)");
    }
}
