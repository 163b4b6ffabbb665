//! # Capability Ports
//!
//! The controller never talks to a chain, a wallet, or an encryption engine
//! directly. It consumes the async capabilities defined here, and whoever
//! owns the session plugs in concrete implementations (a JSON-RPC provider,
//! a browser wallet bridge, the in-process [`crate::sim`] ledger, ...).
//!
//! ```text
//! Signer               — identity address + transaction submission
//! PendingTransaction   — a submitted transaction awaiting inclusion
//! ReadonlyAccess       — contract reads and the latest block timestamp
//! EncryptionCapability — builds encrypted inputs bound to (contract, user)
//! EventSource          — per-kind, per-identity contract event streams
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::primitives::{Address, Handle, TxHash};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by an external capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// A contract read or block query failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The signer refused or failed to submit the transaction.
    #[error("submission failed: {0}")]
    Submit(String),

    /// The encryption engine could not produce a ciphertext.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// An event subscription could not be established or torn down.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// The transaction was included but its receipt reports failure.
    #[error("Transaction failed (tx {0})")]
    TransactionFailed(TxHash),

    /// The capability's transport went away (connection dropped, channel
    /// closed, provider shut down).
    #[error("transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Inclusion status carried by a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Executed successfully.
    Success,
    /// Included but reverted.
    Reverted,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Success => f.write_str("success"),
            TxStatus::Reverted => f.write_str("reverted"),
        }
    }
}

/// Post-inclusion receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the included transaction.
    pub tx_hash: TxHash,
    /// Execution status.
    pub status: TxStatus,
    /// Block the transaction landed in.
    pub block_number: u64,
}

/// A ledger contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    /// `deposit(handle, proof)` with native value attached.
    Deposit {
        /// Ciphertext handle of the encrypted amount.
        handle: Handle,
        /// Input proof binding the handle to (contract, sender).
        proof: Vec<u8>,
        /// Native value in the smallest unit.
        value: u128,
    },
    /// `transfer(handle, proof, recipient)`.
    Transfer {
        /// Ciphertext handle of the encrypted amount.
        handle: Handle,
        /// Input proof binding the handle to (contract, sender).
        proof: Vec<u8>,
        /// Receiving account.
        recipient: Address,
    },
    /// `withdraw()`.
    Withdraw,
}

impl LedgerCall {
    /// Contract method name.
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::Deposit { .. } => "deposit",
            LedgerCall::Transfer { .. } => "transfer",
            LedgerCall::Withdraw => "withdraw",
        }
    }
}

/// A call addressed to a specific contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Target contract.
    pub contract: Address,
    /// Method and arguments.
    pub call: LedgerCall,
}

/// A submitted transaction that has not been awaited yet.
#[async_trait]
pub trait PendingTransaction: Send {
    /// Hash assigned at submission.
    fn hash(&self) -> TxHash;

    /// Waits for inclusion and returns the receipt.
    async fn wait(self: Box<Self>) -> Result<Receipt, CapabilityError>;
}

/// Identity and transaction submission.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the account this signer controls.
    async fn address(&self) -> Result<Address, CapabilityError>;

    /// Signs and submits `request`.
    async fn submit(
        &self,
        request: TransactionRequest,
    ) -> Result<Box<dyn PendingTransaction>, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Readonly chain access.
#[async_trait]
pub trait ReadonlyAccess: Send + Sync {
    /// Timestamp (seconds) of the latest block.
    async fn latest_block_timestamp(&self) -> Result<u64, CapabilityError>;

    /// `balanceOf(account)`: the account's encrypted balance handle.
    async fn balance_of(
        &self,
        contract: Address,
        account: Address,
    ) -> Result<Handle, CapabilityError>;

    /// `totalSupply()`: the encrypted total supply handle.
    async fn total_supply(&self, contract: Address) -> Result<Handle, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Output of an encrypted-input builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    /// One handle per value added, in insertion order.
    pub handles: Vec<Handle>,
    /// Proof covering every handle.
    pub proof: Vec<u8>,
}

/// Accumulates cleartext values and encrypts them in one batch.
#[async_trait]
pub trait EncryptedInputBuilder: Send {
    /// Appends a 64-bit value.
    fn add64(&mut self, value: u64);

    /// Appends a 128-bit value.
    fn add128(&mut self, value: u128);

    /// Encrypts everything added so far.
    async fn encrypt(self: Box<Self>) -> Result<EncryptedInput, CapabilityError>;
}

/// Factory for encrypted inputs scoped to (contract, user).
pub trait EncryptionCapability: Send + Sync {
    /// Starts a new input bound to `contract` and `user`.
    fn create_encrypted_input(
        &self,
        contract: Address,
        user: Address,
    ) -> Box<dyn EncryptedInputBuilder>;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Contract events the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `Deposit(user, ...)`
    Deposit,
    /// `Transfer(user, ...)`: transfer initiated.
    Transfer,
    /// `Transferred(user, ...)`: transfer settled by the callback.
    Transferred,
    /// `Withdraw(user, ...)`: withdraw initiated.
    Withdraw,
    /// `Withdrawn(user, ...)`: withdraw settled by the callback.
    Withdrawn,
}

impl EventKind {
    /// Every kind, in subscription order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Deposit,
        EventKind::Transfer,
        EventKind::Transferred,
        EventKind::Withdraw,
        EventKind::Withdrawn,
    ];

    /// Solidity event name.
    pub fn event_name(self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Transfer => "Transfer",
            EventKind::Transferred => "Transferred",
            EventKind::Withdraw => "Withdraw",
            EventKind::Withdrawn => "Withdrawn",
        }
    }

    /// Status message shown when an event of this kind arrives.
    pub fn status_message(self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit successful",
            EventKind::Transfer => "Transfer initiated",
            EventKind::Transferred => "Transfer completed",
            EventKind::Withdraw => "Withdraw initiated",
            EventKind::Withdrawn => "Withdraw completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Emitting contract.
    pub contract: Address,
    /// First indexed argument: the account the event concerns.
    pub account: Address,
    /// Block the event was emitted in.
    pub block_number: u64,
}

/// Subscription filter: one kind, one contract, one indexed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventFilter {
    /// Emitting contract.
    pub contract: Address,
    /// Event kind.
    pub kind: EventKind,
    /// Indexed account.
    pub account: Address,
}

impl EventFilter {
    /// `true` if `event` passes this filter.
    pub fn matches(&self, event: &LedgerEvent) -> bool {
        self.contract == event.contract && self.kind == event.kind && self.account == event.account
    }
}

/// Opaque subscription id, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// A live subscription: its id and the receiving end of its event channel.
#[derive(Debug)]
pub struct EventSubscription {
    /// Id to pass to [`EventSource::unsubscribe`].
    pub id: SubscriptionId,
    /// Matching events, in emission order.
    pub events: mpsc::Receiver<LedgerEvent>,
}

/// Contract event subscriptions.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribes to events passing `filter`. `capacity` bounds the channel.
    async fn subscribe(
        &self,
        filter: EventFilter,
        capacity: usize,
    ) -> Result<EventSubscription, CapabilityError>;

    /// Tears a subscription down. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_have_distinct_messages() {
        let mut messages: Vec<_> = EventKind::ALL.iter().map(|k| k.status_message()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), EventKind::ALL.len());
    }

    #[test]
    fn filter_matches_exact_triple() {
        let contract = Address::from_bytes([1; 20]);
        let alice = Address::from_bytes([2; 20]);
        let bob = Address::from_bytes([3; 20]);
        let filter = EventFilter {
            contract,
            kind: EventKind::Deposit,
            account: alice,
        };
        let mut event = LedgerEvent {
            kind: EventKind::Deposit,
            contract,
            account: alice,
            block_number: 1,
        };
        assert!(filter.matches(&event));

        event.account = bob;
        assert!(!filter.matches(&event));

        event.account = alice;
        event.kind = EventKind::Withdraw;
        assert!(!filter.matches(&event));
    }

    #[test]
    fn transaction_failed_message_keeps_hash() {
        let err = CapabilityError::TransactionFailed(TxHash::from_bytes([0xaa; 32]));
        assert!(err.to_string().starts_with("Transaction failed"));
        assert!(err.to_string().contains("0xaaaa"));
    }
}
