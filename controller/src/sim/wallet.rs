//! Signer and encryption capabilities bound to a [`SimulatedLedger`].
//!
//! [`SimulatedLedger`]: super::SimulatedLedger

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::capability::{
    CapabilityError, EncryptedInput, EncryptedInputBuilder, EncryptionCapability, EventKind,
    LedgerCall, PendingTransaction, Receipt, Signer, TransactionRequest, TxStatus,
};
use crate::primitives::{Address, Handle, TxHash};

use super::ledger::{Ciphertext, LedgerState};

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// A wallet controlling one address on a simulated ledger.
#[derive(Clone)]
pub struct SimulatedSigner {
    ledger: Arc<LedgerState>,
    address: Address,
}

impl std::fmt::Debug for SimulatedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSigner")
            .field("address", &self.address)
            .finish()
    }
}

/// What happens once the transaction's callback fires.
enum Settlement {
    Transfer { recipient: Address, amount: u128 },
    Withdraw,
}

impl SimulatedSigner {
    pub(crate) fn new(ledger: Arc<LedgerState>, address: Address) -> Self {
        Self { ledger, address }
    }

    fn tx_hash(&self, call: &LedgerCall) -> TxHash {
        let nonce = self.ledger.tx_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(call.method().as_bytes());
        TxHash::from_bytes(hasher.finalize().into())
    }

    /// Looks up an input handle, requiring it to be bound to this contract
    /// and this sender.
    fn owned_input(&self, handle: &Handle, proof: &[u8]) -> Option<Ciphertext> {
        if proof.is_empty() {
            return None;
        }
        let input = *self.ledger.ciphertexts.get(handle)?;
        (input.contract == self.ledger.config.contract && input.owner == self.address)
            .then_some(input)
    }

    /// Returns `None` when the call would revert.
    fn plan(&self, call: &LedgerCall) -> Option<Option<Settlement>> {
        match call {
            LedgerCall::Deposit {
                handle,
                proof,
                value,
            } => {
                let input = self.owned_input(handle, proof)?;
                (input.value == *value).then_some(None)
            }
            LedgerCall::Transfer {
                handle,
                proof,
                recipient,
            } => {
                let input = self.owned_input(handle, proof)?;
                if recipient.is_zero() {
                    return None;
                }
                Some(Some(Settlement::Transfer {
                    recipient: *recipient,
                    amount: input.value,
                }))
            }
            LedgerCall::Withdraw => {
                let funded = !self.ledger.balance(&self.address).handle.is_empty();
                funded.then_some(Some(Settlement::Withdraw))
            }
        }
    }
}

#[async_trait]
impl Signer for SimulatedSigner {
    async fn address(&self) -> Result<Address, CapabilityError> {
        Ok(self.address)
    }

    async fn submit(
        &self,
        request: TransactionRequest,
    ) -> Result<Box<dyn PendingTransaction>, CapabilityError> {
        if request.contract != self.ledger.config.contract {
            return Err(CapabilityError::Submit(format!(
                "no contract at {}",
                request.contract
            )));
        }
        if self.ledger.faults.take_reject() {
            return Err(CapabilityError::Submit("user rejected transaction".into()));
        }

        let tx_hash = self.tx_hash(&request.call);
        let plan = if self.ledger.faults.take_revert() {
            None
        } else {
            self.plan(&request.call)
        };
        self.ledger.submissions.fetch_add(1, Ordering::SeqCst);
        debug!(%tx_hash, method = request.call.method(), reverts = plan.is_none(), "transaction submitted");

        let (tx, rx) = oneshot::channel();
        let ledger = Arc::clone(&self.ledger);
        let sender = self.address;
        let call = request.call;
        tokio::spawn(async move {
            let confirm = Duration::from_millis(ledger.config.confirmation_delay_ms);
            if !confirm.is_zero() {
                tokio::time::sleep(confirm).await;
            }
            let block_number = ledger.mine();

            let Some(settlement) = plan else {
                info!(%tx_hash, block_number, "transaction reverted");
                let _ = tx.send(Receipt {
                    tx_hash,
                    status: TxStatus::Reverted,
                    block_number,
                });
                return;
            };

            match &call {
                LedgerCall::Deposit { value, .. } => {
                    ledger.credit(sender, *value);
                    ledger.emit(EventKind::Deposit, sender);
                }
                LedgerCall::Transfer { .. } => ledger.emit(EventKind::Transfer, sender),
                LedgerCall::Withdraw => ledger.emit(EventKind::Withdraw, sender),
            }
            let _ = tx.send(Receipt {
                tx_hash,
                status: TxStatus::Success,
                block_number,
            });

            let Some(settlement) = settlement else {
                return;
            };
            let callback = Duration::from_millis(ledger.config.callback_delay_ms);
            if !callback.is_zero() {
                tokio::time::sleep(callback).await;
            }
            ledger.mine();
            match settlement {
                Settlement::Transfer { recipient, amount } => {
                    let moved = ledger.move_balance(sender, recipient, amount);
                    debug!(%tx_hash, moved, "transfer settled");
                    ledger.emit(EventKind::Transferred, sender);
                    if recipient != sender {
                        ledger.emit(EventKind::Transferred, recipient);
                    }
                }
                Settlement::Withdraw => {
                    let drained = ledger.drain(sender);
                    debug!(%tx_hash, drained, "withdraw settled");
                    ledger.emit(EventKind::Withdrawn, sender);
                }
            }
        });

        Ok(Box::new(SimulatedPending {
            hash: tx_hash,
            receipt: rx,
        }))
    }
}

/// A transaction submitted to a simulated ledger.
pub struct SimulatedPending {
    hash: TxHash,
    receipt: oneshot::Receiver<Receipt>,
}

#[async_trait]
impl PendingTransaction for SimulatedPending {
    fn hash(&self) -> TxHash {
        self.hash
    }

    async fn wait(self: Box<Self>) -> Result<Receipt, CapabilityError> {
        self.receipt
            .await
            .map_err(|_| CapabilityError::Transport("ledger dropped the transaction".into()))
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Produces BLAKE3 "ciphertext" handles the simulated ledger can open.
#[derive(Clone)]
pub struct SimulatedEncryption {
    ledger: Arc<LedgerState>,
}

impl std::fmt::Debug for SimulatedEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedEncryption").finish_non_exhaustive()
    }
}

impl SimulatedEncryption {
    pub(crate) fn new(ledger: Arc<LedgerState>) -> Self {
        Self { ledger }
    }
}

impl EncryptionCapability for SimulatedEncryption {
    fn create_encrypted_input(
        &self,
        contract: Address,
        user: Address,
    ) -> Box<dyn EncryptedInputBuilder> {
        Box::new(SimulatedInput {
            ledger: Arc::clone(&self.ledger),
            contract,
            user,
            values: Vec::new(),
        })
    }
}

struct SimulatedInput {
    ledger: Arc<LedgerState>,
    contract: Address,
    user: Address,
    values: Vec<u128>,
}

#[async_trait]
impl EncryptedInputBuilder for SimulatedInput {
    fn add64(&mut self, value: u64) {
        self.values.push(u128::from(value));
    }

    fn add128(&mut self, value: u128) {
        self.values.push(value);
    }

    async fn encrypt(self: Box<Self>) -> Result<EncryptedInput, CapabilityError> {
        if self.ledger.faults.encryption_fails() {
            return Err(CapabilityError::Encryption("relayer unavailable".into()));
        }
        if self.values.is_empty() {
            return Err(CapabilityError::Encryption("empty input".into()));
        }

        let mut proof = Sha256::new();
        proof.update(self.contract.as_bytes());
        proof.update(self.user.as_bytes());

        let mut handles = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let nonce: u64 = rand::random();
            let mut hasher = blake3::Hasher::new();
            hasher.update(b"input");
            hasher.update(self.contract.as_bytes());
            hasher.update(self.user.as_bytes());
            hasher.update(&value.to_be_bytes());
            hasher.update(&nonce.to_be_bytes());
            let handle = Handle::from_bytes(*hasher.finalize().as_bytes());

            self.ledger.ciphertexts.insert(
                handle,
                Ciphertext {
                    value: *value,
                    contract: self.contract,
                    owner: self.user,
                },
            );
            proof.update(handle.as_bytes());
            handles.push(handle);
        }

        Ok(EncryptedInput {
            handles,
            proof: proof.finalize().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedLedger;

    fn alice() -> Address {
        Address::from_bytes([0xa1; 20])
    }

    async fn encrypted(ledger: &SimulatedLedger, owner: Address, value: u128) -> (Handle, Vec<u8>) {
        let mut input = ledger
            .encryption()
            .create_encrypted_input(ledger.contract(), owner);
        input.add128(value);
        let out = input.encrypt().await.unwrap();
        (out.handles[0], out.proof)
    }

    fn request(ledger: &SimulatedLedger, call: LedgerCall) -> TransactionRequest {
        TransactionRequest {
            contract: ledger.contract(),
            call,
        }
    }

    #[tokio::test]
    async fn deposit_credits_sender() {
        let ledger = SimulatedLedger::default();
        let (handle, proof) = encrypted(&ledger, alice(), 1000).await;
        let pending = ledger
            .signer(alice())
            .submit(request(
                &ledger,
                LedgerCall::Deposit {
                    handle,
                    proof,
                    value: 1000,
                },
            ))
            .await
            .unwrap();
        let receipt = pending.wait().await.unwrap();
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(ledger.cleartext_balance(alice()), 1000);
        assert_eq!(ledger.submissions(), 1);
    }

    #[tokio::test]
    async fn deposit_value_mismatch_reverts() {
        let ledger = SimulatedLedger::default();
        let (handle, proof) = encrypted(&ledger, alice(), 1000).await;
        let pending = ledger
            .signer(alice())
            .submit(request(
                &ledger,
                LedgerCall::Deposit {
                    handle,
                    proof,
                    value: 999,
                },
            ))
            .await
            .unwrap();
        assert_eq!(pending.wait().await.unwrap().status, TxStatus::Reverted);
        assert_eq!(ledger.cleartext_balance(alice()), 0);
    }

    #[tokio::test]
    async fn foreign_input_reverts() {
        let ledger = SimulatedLedger::default();
        let bob = Address::from_bytes([0xb0; 20]);
        let (handle, proof) = encrypted(&ledger, bob, 5).await;
        let pending = ledger
            .signer(alice())
            .submit(request(
                &ledger,
                LedgerCall::Deposit {
                    handle,
                    proof,
                    value: 5,
                },
            ))
            .await
            .unwrap();
        assert_eq!(pending.wait().await.unwrap().status, TxStatus::Reverted);
    }

    #[tokio::test]
    async fn withdraw_without_balance_reverts() {
        let ledger = SimulatedLedger::default();
        let pending = ledger
            .signer(alice())
            .submit(request(&ledger, LedgerCall::Withdraw))
            .await
            .unwrap();
        assert_eq!(pending.wait().await.unwrap().status, TxStatus::Reverted);
    }

    #[tokio::test]
    async fn rejection_fault_fails_submission() {
        let ledger = SimulatedLedger::default();
        ledger.faults().reject_next(1);
        let err = ledger
            .signer(alice())
            .submit(request(&ledger, LedgerCall::Withdraw))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CapabilityError::Submit(_)));
        assert_eq!(ledger.submissions(), 0);
    }

    #[tokio::test]
    async fn encryption_fault_fails_encrypt() {
        let ledger = SimulatedLedger::default();
        ledger.faults().fail_encryption(true);
        let mut input = ledger
            .encryption()
            .create_encrypted_input(ledger.contract(), alice());
        input.add64(1);
        assert!(matches!(
            input.encrypt().await,
            Err(CapabilityError::Encryption(_))
        ));
    }

    #[tokio::test]
    async fn handles_are_unique_per_encryption() {
        let ledger = SimulatedLedger::default();
        let (a, _) = encrypted(&ledger, alice(), 7).await;
        let (b, _) = encrypted(&ledger, alice(), 7).await;
        assert_ne!(a, b);
    }
}
