// Copyright (c) 2026 Confidential P2P Ether contributors. MIT License.
// See LICENSE for details.

//! # ConfidentialP2PEther — Operation Controller
//!
//! Client-side controller for a confidential-balance ledger contract. The
//! contract holds encrypted per-account balances and an encrypted total
//! supply; this crate mediates between a presentation layer and that
//! contract.
//!
//! ## Architecture
//!
//! - **primitives** — Addresses, ciphertext handles, tx hashes, identity
//!   fingerprints.
//! - **config** — Constants and the tunable [`ControllerConfig`].
//! - **deployment** — Network id to contract address resolution.
//! - **capability** — Async ports for the signer, reads, encryption and
//!   events. The controller never talks to a chain directly.
//! - **operation** — Guard flags, operation snapshots, staleness detection,
//!   outcomes.
//! - **state** — The account-state cache with its atomic commit.
//! - **controller** — Session management, refresh, deposit, transfer,
//!   withdraw, the event reactor and the observable view.
//! - **sim** — An in-process ledger implementing every capability.
//!
//! ## Ground rules
//!
//! 1. One operation per class at a time. A second invocation is a no-op.
//! 2. Results computed against a session that has since moved are dropped,
//!    never committed.
//! 3. Operations return an [`OperationOutcome`]; failures surface through
//!    it and the status message, never as a panic.

pub mod capability;
pub mod config;
pub mod controller;
pub mod deployment;
pub mod operation;
pub mod primitives;
pub mod sim;
pub mod state;

pub use capability::{CapabilityError, EventKind};
pub use config::{AmountWidth, ControllerConfig, CONTRACT_NAME};
pub use controller::{Controller, ControllerView, Session};
pub use deployment::{Deployment, DeploymentDescriptor, DeploymentError};
pub use operation::{OperationClass, OperationOutcome, ValidationError};
pub use primitives::{Address, Handle, NetworkId, TxHash};
pub use state::AccountState;
