//! Deposit, transfer and withdraw.
//!
//! All three run the same template:
//!
//! 1. Skip if the class is already in flight; validate; snapshot the context
//!    and take the guard. None of this yields.
//! 2. Wait out the settling delay.
//! 3. Deposit/transfer: encrypt the amount, bound to (contract, signer).
//! 4. Abort as "ignored" if the session moved.
//! 5. Submit, await inclusion, fail on a non-success receipt.
//! 6. Abort as "ignored" if the session moved while confirming.
//! 7. Deposit refreshes immediately. Transfer and withdraw settle through a
//!    contract callback, so their refresh comes from the event reactor.
//!
//! Any failure in 3–6 is reported and followed by a reconciling refresh.
//! The guard ticket is released on every path.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::capability::{
    CapabilityError, EncryptionCapability, LedgerCall, Signer, TransactionRequest, TxStatus,
};
use crate::config::AmountWidth;
use crate::operation::{
    OperationClass, OperationContext, OperationOutcome, StalenessDetector, ValidationError,
};
use crate::primitives::{Address, Handle};

use super::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitIntent {
    Deposit { amount: u128 },
    Transfer { amount: u128, recipient: Address },
    Withdraw,
}

impl SubmitIntent {
    fn class(&self) -> OperationClass {
        match self {
            SubmitIntent::Deposit { .. } => OperationClass::Deposit,
            SubmitIntent::Transfer { .. } => OperationClass::Transfer,
            SubmitIntent::Withdraw => OperationClass::Withdraw,
        }
    }

    fn starting_message(&self) -> String {
        match self {
            SubmitIntent::Deposit { amount } => {
                format!("Starting deposit with amount {} wei...", amount)
            }
            SubmitIntent::Transfer { amount, recipient } => {
                format!("Starting transfer of {} wei to {}...", amount, recipient)
            }
            SubmitIntent::Withdraw => "Starting withdraw...".to_string(),
        }
    }

    fn confirmed_message(&self, status: TxStatus) -> String {
        match self {
            SubmitIntent::Deposit { .. } => format!("Deposit completed, status={}.", status),
            SubmitIntent::Transfer { .. } => {
                "Transfer transaction confirmed, awaiting callback...".to_string()
            }
            SubmitIntent::Withdraw => {
                "Withdraw transaction confirmed, awaiting callback...".to_string()
            }
        }
    }
}

struct PreparedSubmit {
    intent: SubmitIntent,
    context: OperationContext,
    signer: Arc<dyn Signer>,
    encryption: Option<Arc<dyn EncryptionCapability>>,
    width: AmountWidth,
}

enum Progress {
    Confirmed,
    Ignored,
}

/// Checks that `amount` is positive and fits the ledger's amount field.
fn check_amount(amount: i128, width: AmountWidth) -> Result<u128, ValidationError> {
    if amount <= 0 {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    let value = amount as u128;
    if value > width.ceiling() {
        return Err(ValidationError::AmountTooLarge {
            amount,
            bits: width.bits(),
        });
    }
    Ok(value)
}

impl Controller {
    /// Deposits `amount` (smallest unit) as an encrypted balance. The same
    /// amount is attached as native value.
    pub async fn deposit(&self, amount: i128) -> OperationOutcome {
        let class = OperationClass::Deposit;
        if self.skip_if_busy(class) {
            return OperationOutcome::Skipped;
        }
        let prepared = self.prepare_submit(class, |width| {
            Ok(SubmitIntent::Deposit {
                amount: check_amount(amount, width)?,
            })
        });
        self.run_submit(class, prepared).await
    }

    /// Transfers `amount` (smallest unit) of encrypted balance to `recipient`.
    pub async fn transfer(&self, amount: i128, recipient: &str) -> OperationOutcome {
        let class = OperationClass::Transfer;
        if self.skip_if_busy(class) {
            return OperationOutcome::Skipped;
        }
        let prepared = self.prepare_submit(class, |width| {
            let amount = check_amount(amount, width)?;
            let recipient = recipient
                .parse::<Address>()
                .map_err(|_| ValidationError::InvalidRecipient(recipient.to_string()))?;
            Ok(SubmitIntent::Transfer { amount, recipient })
        });
        self.run_submit(class, prepared).await
    }

    /// Withdraws the whole encrypted balance.
    pub async fn withdraw(&self) -> OperationOutcome {
        let class = OperationClass::Withdraw;
        if self.skip_if_busy(class) {
            return OperationOutcome::Skipped;
        }
        let prepared = self.prepare_submit(class, |_| Ok(SubmitIntent::Withdraw));
        self.run_submit(class, prepared).await
    }

    fn skip_if_busy(&self, class: OperationClass) -> bool {
        let busy = self.inner.guard.is_held(class);
        if busy {
            debug!(%class, "already in flight, skipping");
        }
        busy
    }

    fn prepare_submit(
        &self,
        class: OperationClass,
        intent: impl FnOnce(AmountWidth) -> Result<SubmitIntent, ValidationError>,
    ) -> Result<PreparedSubmit, ValidationError> {
        let live = self.inner.session.read();
        if live.deployment.is_none() {
            return Err(ValidationError::NotDeployed(live.network_id));
        }
        let slot = live
            .signer
            .as_ref()
            .ok_or(ValidationError::MissingCapability("signer"))?;
        let needs_encryption = class != OperationClass::Withdraw;
        if needs_encryption && live.encryption.is_none() {
            return Err(ValidationError::MissingCapability("encryption"));
        }

        let width = self.inner.config.amount_width;
        let intent = intent(width)?;
        let context = live
            .operation_context()
            .ok_or(ValidationError::MissingCapability("signer"))?;

        Ok(PreparedSubmit {
            intent,
            context,
            signer: Arc::clone(&slot.signer),
            encryption: live.encryption.clone(),
            width,
        })
    }

    async fn run_submit(
        &self,
        class: OperationClass,
        prepared: Result<PreparedSubmit, ValidationError>,
    ) -> OperationOutcome {
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%class, error = %e, "rejected");
                self.set_message(e.status_message(class));
                return OperationOutcome::Rejected(e);
            }
        };
        let Some(_ticket) = self.inner.guard.acquire(class) else {
            debug!(%class, "already in flight, skipping");
            return OperationOutcome::Skipped;
        };
        debug_assert_eq!(prepared.intent.class(), class);

        info!(
            %class,
            network_id = prepared.context.network_id(),
            contract = %prepared.context.contract(),
            "operation accepted"
        );
        self.set_message(prepared.intent.starting_message());

        tokio::time::sleep(self.inner.config.settle_delay()).await;

        let detector = self.staleness_detector();
        match self.execute(&prepared, &detector).await {
            Ok(Progress::Confirmed) if !detector.is_stale(&prepared.context) => {
                if class == OperationClass::Deposit {
                    self.refresh_state().await;
                } else {
                    debug!(%class, "awaiting settlement event before refreshing");
                }
                info!(%class, "operation completed");
                OperationOutcome::Completed
            }
            Ok(_) => {
                info!(%class, "session changed mid-flight, result ignored");
                self.set_message(format!("Ignore {}", class));
                OperationOutcome::Ignored
            }
            Err(e) => {
                error!(%class, error = %e, "operation failed");
                self.set_message(format!("{} Failed! error={}", class.title(), e));
                self.refresh_state().await;
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        prepared: &PreparedSubmit,
        detector: &StalenessDetector,
    ) -> Result<Progress, CapabilityError> {
        let contract = prepared.context.contract();
        let call = match prepared.intent {
            SubmitIntent::Deposit { amount } => {
                let (handle, proof) = encrypt_amount(prepared, amount).await?;
                LedgerCall::Deposit {
                    handle,
                    proof,
                    value: amount,
                }
            }
            SubmitIntent::Transfer { amount, recipient } => {
                let (handle, proof) = encrypt_amount(prepared, amount).await?;
                LedgerCall::Transfer {
                    handle,
                    proof,
                    recipient,
                }
            }
            SubmitIntent::Withdraw => LedgerCall::Withdraw,
        };

        if detector.is_stale(&prepared.context) {
            return Ok(Progress::Ignored);
        }

        self.set_message(format!("Calling {}...", call.method()));
        let pending = prepared
            .signer
            .submit(TransactionRequest { contract, call })
            .await?;
        let tx_hash = pending.hash();
        self.set_message(format!("Waiting for tx: {}...", tx_hash));

        let receipt = pending.wait().await?;
        if receipt.status != TxStatus::Success {
            return Err(CapabilityError::TransactionFailed(receipt.tx_hash));
        }
        debug!(%tx_hash, block = receipt.block_number, "transaction included");
        self.set_message(prepared.intent.confirmed_message(receipt.status));

        Ok(Progress::Confirmed)
    }
}

async fn encrypt_amount(
    prepared: &PreparedSubmit,
    amount: u128,
) -> Result<(Handle, Vec<u8>), CapabilityError> {
    let encryption = prepared
        .encryption
        .as_ref()
        .ok_or_else(|| CapabilityError::Encryption("no encryption capability".into()))?;
    let user = prepared.signer.address().await?;

    let mut input = encryption.create_encrypted_input(prepared.context.contract(), user);
    match prepared.width {
        AmountWidth::U64 => {
            let value = u64::try_from(amount)
                .map_err(|_| CapabilityError::Encryption("amount exceeds uint64".into()))?;
            input.add64(value);
        }
        AmountWidth::U128 => input.add128(amount),
    }
    let encrypted = input.encrypt().await?;
    let handle = encrypted
        .handles
        .first()
        .copied()
        .ok_or_else(|| CapabilityError::Encryption("no handle produced".into()))?;
    Ok((handle, encrypted.proof))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_must_be_positive() {
        assert_eq!(
            check_amount(0, AmountWidth::U128),
            Err(ValidationError::NonPositiveAmount(0))
        );
        assert_eq!(
            check_amount(-5, AmountWidth::U128),
            Err(ValidationError::NonPositiveAmount(-5))
        );
    }

    #[test]
    fn amount_must_fit_width() {
        let over = u64::MAX as i128 + 1;
        assert_eq!(
            check_amount(over, AmountWidth::U64),
            Err(ValidationError::AmountTooLarge {
                amount: over,
                bits: 64
            })
        );
        assert_eq!(check_amount(over, AmountWidth::U128), Ok(over as u128));
        assert_eq!(
            check_amount(u64::MAX as i128, AmountWidth::U64),
            Ok(u64::MAX as u128)
        );
    }

    #[test]
    fn starting_messages() {
        assert_eq!(
            SubmitIntent::Deposit { amount: 1000 }.starting_message(),
            "Starting deposit with amount 1000 wei..."
        );
        let recipient = Address::from_bytes([0xbb; 20]);
        assert_eq!(
            SubmitIntent::Transfer {
                amount: 5,
                recipient
            }
            .starting_message(),
            format!("Starting transfer of 5 wei to {}...", recipient)
        );
        assert_eq!(
            SubmitIntent::Withdraw.confirmed_message(TxStatus::Success),
            "Withdraw transaction confirmed, awaiting callback..."
        );
        assert_eq!(
            SubmitIntent::Deposit { amount: 1 }.confirmed_message(TxStatus::Success),
            "Deposit completed, status=success."
        );
    }
}
