//! In-memory ConfidentialP2PEther ledger.
//!
//! Cleartext balances live next to the handles that "encrypt" them. Handles
//! are BLAKE3 digests, so they are unique per write and carry no information
//! to anyone who only sees the handle, which is all the controller ever sees.
//!
//! Transfer and withdraw settle in two phases, mirroring a decryption
//! callback: inclusion emits `Transfer`/`Withdraw`, and after
//! `callback_delay_ms` the balances move and `Transferred`/`Withdrawn` fire.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::capability::{
    CapabilityError, EventFilter, EventKind, EventSource, EventSubscription, LedgerEvent,
    ReadonlyAccess, SubscriptionId,
};
use crate::primitives::{Address, Handle};

use super::wallet::{SimulatedEncryption, SimulatedSigner};

/// The address hardhat assigns to the first contract deployed by the
/// default account.
pub const HARDHAT_FIRST_CONTRACT: Address = Address::from_bytes([
    0x5f, 0xbd, 0xb2, 0x31, 0x56, 0x78, 0xaf, 0xec, 0xb3, 0x67, 0xf0, 0x32, 0xd9, 0x3f, 0x64, 0x2f,
    0x64, 0x18, 0x0a, 0xa3,
]);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable behaviour of a simulated ledger.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Address the contract is "deployed" at.
    pub contract: Address,
    /// Timestamp of block zero, in seconds.
    pub genesis_timestamp: u64,
    /// Seconds added to the clock per mined block.
    pub block_time_secs: u64,
    /// Delay between submission and inclusion.
    pub confirmation_delay_ms: u64,
    /// Delay between inclusion and the settlement callback of transfers and
    /// withdraws.
    pub callback_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            contract: HARDHAT_FIRST_CONTRACT,
            genesis_timestamp: 1_700_000_000,
            block_time_secs: 2,
            confirmation_delay_ms: 0,
            callback_delay_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Switches for making the simulated ledger misbehave.
#[derive(Debug, Default)]
pub struct FaultInjector {
    fail_reads: AtomicBool,
    fail_encryption: AtomicBool,
    read_delay_ms: AtomicU64,
    revert_next: AtomicUsize,
    reject_next: AtomicUsize,
}

impl FaultInjector {
    /// Every read fails while set.
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Every encryption fails while set.
    pub fn fail_encryption(&self, on: bool) {
        self.fail_encryption.store(on, Ordering::SeqCst);
    }

    /// Adds latency to every read.
    pub fn read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next `n` included transactions revert.
    pub fn revert_next(&self, n: usize) {
        self.revert_next.store(n, Ordering::SeqCst);
    }

    /// The next `n` submissions are refused by the signer.
    pub fn reject_next(&self, n: usize) {
        self.reject_next.store(n, Ordering::SeqCst);
    }

    pub(crate) fn reads_fail(&self) -> bool {
        self.fail_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn encryption_fails(&self) -> bool {
        self.fail_encryption.load(Ordering::SeqCst)
    }

    pub(crate) fn take_revert(&self) -> bool {
        take_one(&self.revert_next)
    }

    pub(crate) fn take_reject(&self) -> bool {
        take_one(&self.reject_next)
    }

    fn read_delay_value(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms.load(Ordering::SeqCst))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub(crate) cleartext: u128,
    pub(crate) handle: Handle,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            cleartext: 0,
            handle: Handle::EMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ciphertext {
    pub(crate) value: u128,
    pub(crate) contract: Address,
    pub(crate) owner: Address,
}

#[derive(Debug)]
struct Chain {
    block_number: u64,
    timestamp: u64,
}

type Subscribers = BTreeMap<SubscriptionId, (EventFilter, mpsc::Sender<LedgerEvent>)>;

pub(crate) struct LedgerState {
    pub(crate) config: SimulationConfig,
    chain: Mutex<Chain>,
    balances: DashMap<Address, Slot>,
    supply: Mutex<Slot>,
    pub(crate) ciphertexts: DashMap<Handle, Ciphertext>,
    subscribers: Mutex<Subscribers>,
    next_subscription: AtomicU64,
    write_nonce: AtomicU64,
    pub(crate) tx_counter: AtomicU64,
    pub(crate) faults: FaultInjector,
    balance_reads: AtomicU64,
    pub(crate) submissions: AtomicU64,
}

impl LedgerState {
    fn new(config: SimulationConfig) -> Self {
        let chain = Chain {
            block_number: 0,
            timestamp: config.genesis_timestamp,
        };
        Self {
            config,
            chain: Mutex::new(chain),
            balances: DashMap::new(),
            supply: Mutex::new(Slot::default()),
            ciphertexts: DashMap::new(),
            subscribers: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            write_nonce: AtomicU64::new(0),
            tx_counter: AtomicU64::new(0),
            faults: FaultInjector::default(),
            balance_reads: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        }
    }

    /// Mines a block and returns its number.
    pub(crate) fn mine(&self) -> u64 {
        let mut chain = self.chain.lock();
        chain.block_number += 1;
        chain.timestamp += self.config.block_time_secs;
        chain.block_number
    }

    fn block_number(&self) -> u64 {
        self.chain.lock().block_number
    }

    fn seal(&self, tag: &[u8], owner: &Address, value: u128) -> Handle {
        let nonce = self.write_nonce.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(tag);
        hasher.update(self.config.contract.as_bytes());
        hasher.update(owner.as_bytes());
        hasher.update(&value.to_be_bytes());
        hasher.update(&nonce.to_be_bytes());
        Handle::from_bytes(*hasher.finalize().as_bytes())
    }

    pub(crate) fn balance(&self, account: &Address) -> Slot {
        self.balances.get(account).map(|s| *s).unwrap_or_default()
    }

    fn set_balance(&self, account: Address, cleartext: u128) {
        let handle = self.seal(b"balance", &account, cleartext);
        self.balances.insert(account, Slot { cleartext, handle });
    }

    fn adjust_supply(&self, apply: impl FnOnce(u128) -> u128) {
        let mut supply = self.supply.lock();
        let cleartext = apply(supply.cleartext);
        let handle = self.seal(b"supply", &self.config.contract, cleartext);
        *supply = Slot { cleartext, handle };
    }

    pub(crate) fn credit(&self, account: Address, amount: u128) {
        let current = self.balance(&account).cleartext;
        self.set_balance(account, current.saturating_add(amount));
        self.adjust_supply(|s| s.saturating_add(amount));
    }

    /// Moves `amount` if the sender can cover it, otherwise moves nothing
    /// (an encrypted ledger cannot branch on the balance, so it transfers an
    /// encrypted zero). Both sides get fresh handles either way.
    pub(crate) fn move_balance(&self, from: Address, to: Address, amount: u128) -> u128 {
        let sender = self.balance(&from).cleartext;
        let moved = if amount <= sender { amount } else { 0 };
        self.set_balance(from, sender - moved);
        let receiver = self.balance(&to).cleartext;
        self.set_balance(to, receiver.saturating_add(moved));
        moved
    }

    /// Clears `account`'s balance slot and returns what it held.
    pub(crate) fn drain(&self, account: Address) -> u128 {
        let amount = self
            .balances
            .remove(&account)
            .map(|(_, s)| s.cleartext)
            .unwrap_or(0);
        self.adjust_supply(|s| s.saturating_sub(amount));
        amount
    }

    pub(crate) fn emit(&self, kind: EventKind, account: Address) {
        let event = LedgerEvent {
            kind,
            contract: self.config.contract,
            account,
            block_number: self.block_number(),
        };
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, (filter, tx)| {
            if !filter.matches(&event) {
                return true;
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(?id, %kind, "subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        trace!(%kind, %account, "event emitted");
    }

    async fn before_read(&self) -> Result<(), CapabilityError> {
        let delay = self.faults.read_delay_value();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.faults.reads_fail() {
            return Err(CapabilityError::Read("rpc unavailable".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimulatedLedger
// ---------------------------------------------------------------------------

/// Handle to a simulated ledger. Clones share state.
#[derive(Clone)]
pub struct SimulatedLedger {
    pub(crate) state: Arc<LedgerState>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl std::fmt::Debug for SimulatedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLedger")
            .field("contract", &self.state.config.contract)
            .field("block", &self.state.block_number())
            .finish()
    }
}

impl SimulatedLedger {
    /// A fresh ledger with no balances.
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            state: Arc::new(LedgerState::new(config)),
        }
    }

    /// Contract address.
    pub fn contract(&self) -> Address {
        self.state.config.contract
    }

    /// A signer controlling `address`.
    pub fn signer(&self, address: Address) -> SimulatedSigner {
        SimulatedSigner::new(Arc::clone(&self.state), address)
    }

    /// An encryption capability bound to this ledger.
    pub fn encryption(&self) -> SimulatedEncryption {
        SimulatedEncryption::new(Arc::clone(&self.state))
    }

    /// Fault switches.
    pub fn faults(&self) -> &FaultInjector {
        &self.state.faults
    }

    /// Current chain timestamp.
    pub fn latest_timestamp(&self) -> u64 {
        self.state.chain.lock().timestamp
    }

    /// Cleartext balance of `account` (test/demo introspection only).
    pub fn cleartext_balance(&self, account: Address) -> u128 {
        self.state.balance(&account).cleartext
    }

    /// Current balance handle of `account`.
    pub fn balance_handle(&self, account: Address) -> Handle {
        self.state.balance(&account).handle
    }

    /// Cleartext total supply.
    pub fn cleartext_supply(&self) -> u128 {
        self.state.supply.lock().cleartext
    }

    /// Number of `balanceOf` calls served.
    pub fn balance_reads(&self) -> u64 {
        self.state.balance_reads.load(Ordering::SeqCst)
    }

    /// Number of transactions accepted by signers.
    pub fn submissions(&self) -> u64 {
        self.state.submissions.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().len()
    }

    /// Emits an event as if some other party's transaction produced it.
    pub fn emit_event(&self, kind: EventKind, account: Address) {
        self.state.mine();
        self.state.emit(kind, account);
    }
}

#[async_trait]
impl ReadonlyAccess for SimulatedLedger {
    async fn latest_block_timestamp(&self) -> Result<u64, CapabilityError> {
        self.state.before_read().await?;
        Ok(self.latest_timestamp())
    }

    async fn balance_of(
        &self,
        contract: Address,
        account: Address,
    ) -> Result<Handle, CapabilityError> {
        self.state.before_read().await?;
        if contract != self.state.config.contract {
            return Err(CapabilityError::Read(format!("no contract at {}", contract)));
        }
        self.state.balance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.balance(&account).handle)
    }

    async fn total_supply(&self, contract: Address) -> Result<Handle, CapabilityError> {
        self.state.before_read().await?;
        if contract != self.state.config.contract {
            return Err(CapabilityError::Read(format!("no contract at {}", contract)));
        }
        Ok(self.state.supply.lock().handle)
    }
}

#[async_trait]
impl EventSource for SimulatedLedger {
    async fn subscribe(
        &self,
        filter: EventFilter,
        capacity: usize,
    ) -> Result<EventSubscription, CapabilityError> {
        if filter.contract != self.state.config.contract {
            return Err(CapabilityError::Subscription(format!(
                "no contract at {}",
                filter.contract
            )));
        }
        let id = SubscriptionId(self.state.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.state.subscribers.lock().insert(id, (filter, tx));
        debug!(?id, kind = %filter.kind, account = %filter.account, "subscribed");
        Ok(EventSubscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), CapabilityError> {
        self.state.subscribers.lock().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_bytes([0xa1; 20])
    }

    fn bob() -> Address {
        Address::from_bytes([0xb0; 20])
    }

    #[test]
    fn credit_updates_balance_supply_and_handles() {
        let ledger = SimulatedLedger::default();
        assert!(ledger.balance_handle(alice()).is_empty());

        ledger.state.credit(alice(), 100);
        assert_eq!(ledger.cleartext_balance(alice()), 100);
        assert_eq!(ledger.cleartext_supply(), 100);
        assert!(!ledger.balance_handle(alice()).is_empty());
    }

    #[test]
    fn every_write_gets_a_new_handle() {
        let ledger = SimulatedLedger::default();
        ledger.state.credit(alice(), 1);
        let first = ledger.balance_handle(alice());
        ledger.state.credit(alice(), 0);
        assert_ne!(first, ledger.balance_handle(alice()));
    }

    #[test]
    fn overdrawn_transfer_moves_nothing() {
        let ledger = SimulatedLedger::default();
        ledger.state.credit(alice(), 10);
        assert_eq!(ledger.state.move_balance(alice(), bob(), 11), 0);
        assert_eq!(ledger.cleartext_balance(alice()), 10);
        assert_eq!(ledger.state.move_balance(alice(), bob(), 4), 4);
        assert_eq!(ledger.cleartext_balance(bob()), 4);
        assert_eq!(ledger.cleartext_supply(), 10);
    }

    #[test]
    fn drain_clears_slot() {
        let ledger = SimulatedLedger::default();
        ledger.state.credit(alice(), 10);
        assert_eq!(ledger.state.drain(alice()), 10);
        assert!(ledger.balance_handle(alice()).is_empty());
        assert_eq!(ledger.cleartext_supply(), 0);
    }

    #[test]
    fn fault_counters_run_out() {
        let faults = FaultInjector::default();
        faults.revert_next(2);
        assert!(faults.take_revert());
        assert!(faults.take_revert());
        assert!(!faults.take_revert());
    }

    #[tokio::test]
    async fn subscriptions_filter_and_unsubscribe() {
        let ledger = SimulatedLedger::default();
        let filter = EventFilter {
            contract: ledger.contract(),
            kind: EventKind::Deposit,
            account: alice(),
        };
        let mut sub = ledger.subscribe(filter, 4).await.unwrap();
        assert_eq!(ledger.subscriber_count(), 1);

        ledger.emit_event(EventKind::Deposit, bob());
        ledger.emit_event(EventKind::Withdraw, alice());
        ledger.emit_event(EventKind::Deposit, alice());

        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Deposit);
        assert_eq!(event.account, alice());
        assert!(sub.events.try_recv().is_err());

        ledger.unsubscribe(sub.id).await.unwrap();
        assert_eq!(ledger.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn reads_honour_fault_switch() {
        let ledger = SimulatedLedger::default();
        assert!(ledger.latest_block_timestamp().await.is_ok());
        ledger.faults().fail_reads(true);
        assert!(matches!(
            ledger.total_supply(ledger.contract()).await,
            Err(CapabilityError::Read(_))
        ));
    }

    #[tokio::test]
    async fn subscribing_to_foreign_contract_fails() {
        let ledger = SimulatedLedger::default();
        let filter = EventFilter {
            contract: Address::from_bytes([9; 20]),
            kind: EventKind::Deposit,
            account: alice(),
        };
        assert!(ledger.subscribe(filter, 1).await.is_err());
    }
}
