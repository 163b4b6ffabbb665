//! # Simulated Ledger
//!
//! An in-process stand-in for a deployed ConfidentialP2PEther contract and
//! the wallet, relayer and RPC endpoints around it. It implements every
//! capability port, so a [`crate::Controller`] can run its full lifecycle
//! (deposits, two-phase transfers and withdraws, event-driven refreshes)
//! without a chain.
//!
//! ```text
//! ledger.rs — contract state, clock, event fan-out, fault switches
//! wallet.rs — signer, pending transactions, encrypted-input builder
//! ```
//!
//! Used by the test suites and by `cpe-console simulate`.

mod ledger;
mod wallet;

pub use ledger::{FaultInjector, SimulatedLedger, SimulationConfig, HARDHAT_FIRST_CONTRACT};
pub use wallet::{SimulatedEncryption, SimulatedPending, SimulatedSigner};
