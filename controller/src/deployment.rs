//! Deployment descriptor: maps a network id to the ledger contract's address.
//!
//! The descriptor is static configuration. A network with no entry, or with
//! an entry pointing at the null address, simply has no deployment; that is
//! a configuration condition and never a transient error.
//!
//! The JSON form is keyed by decimal chain id:
//!
//! ```text
//! {
//!   "31337":    { "address": "0x5FbD…", "chainId": 31337,    "chainName": "hardhat" },
//!   "11155111": { "address": "0x0000…", "chainId": 11155111, "chainName": "sepolia" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::{Address, NetworkId};

/// Errors produced while loading a descriptor.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The descriptor file could not be read.
    #[error("failed to read deployment descriptor: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid descriptor JSON.
    #[error("malformed deployment descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A key is not a decimal chain id.
    #[error("invalid chain id key {0:?}")]
    InvalidKey(String),
}

/// One entry of the descriptor as it appears on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEntry {
    /// Contract address on this network.
    pub address: Address,
    /// Chain id recorded by the deploy script, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<NetworkId>,
    /// Human-readable chain name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
}

/// A resolved deployment on the active network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    /// Contract address. Never the null address.
    pub address: Address,
    /// Chain id the deployment lives on.
    pub network_id: NetworkId,
    /// Human-readable chain name, when known.
    pub chain_name: Option<String>,
}

/// Network id → deployment lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    entries: BTreeMap<NetworkId, DeploymentEntry>,
}

impl DeploymentDescriptor {
    /// An empty descriptor. Every network resolves as "not deployed".
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the entry for `network_id`.
    pub fn with_entry(
        mut self,
        network_id: NetworkId,
        address: Address,
        chain_name: Option<&str>,
    ) -> Self {
        self.entries.insert(
            network_id,
            DeploymentEntry {
                address,
                chain_id: Some(network_id),
                chain_name: chain_name.map(str::to_string),
            },
        );
        self
    }

    /// Parses the JSON form described in the module docs.
    pub fn from_json(json: &str) -> Result<Self, DeploymentError> {
        let raw: BTreeMap<String, DeploymentEntry> = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        for (key, entry) in raw {
            let id = key
                .trim()
                .parse::<NetworkId>()
                .map_err(|_| DeploymentError::InvalidKey(key.clone()))?;
            entries.insert(id, entry);
        }
        Ok(Self { entries })
    }

    /// Reads and parses a descriptor file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeploymentError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Resolves the deployment for `network_id`.
    ///
    /// Returns `None` when there is no entry or the entry's address is the
    /// null address.
    pub fn resolve(&self, network_id: NetworkId) -> Option<Deployment> {
        let entry = self.entries.get(&network_id)?;
        if entry.address == Address::ZERO {
            return None;
        }
        Some(Deployment {
            address: entry.address,
            network_id: entry.chain_id.unwrap_or(network_id),
            chain_name: entry.chain_name.clone(),
        })
    }

    /// Iterates over every raw entry, including null-address placeholders.
    pub fn entries(&self) -> impl Iterator<Item = (NetworkId, &DeploymentEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Number of raw entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the descriptor has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
