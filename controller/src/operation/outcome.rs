//! Settled results of controller operations.
//!
//! No error crosses the controller boundary. Every public operation settles
//! into an [`OperationOutcome`] and mirrors it in the status message.

use std::fmt;

use thiserror::Error;

use super::guard::OperationClass;

/// Why an operation was refused before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The ledger contract has no deployment on the active network.
    #[error("contract not deployed on network {}", network_label(.0))]
    NotDeployed(Option<u64>),

    /// A capability the operation needs is absent from the session.
    #[error("missing capability: {0}")]
    MissingCapability(&'static str),

    /// The cleartext amount is zero or negative.
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i128),

    /// The cleartext amount does not fit the ledger's amount field.
    #[error("amount {amount} exceeds uint{bits} limit")]
    AmountTooLarge {
        /// Requested amount.
        amount: i128,
        /// Bit width of the amount field.
        bits: u32,
    },

    /// The transfer recipient is not a well-formed address.
    #[error("invalid recipient address {0:?}")]
    InvalidRecipient(String),
}

impl ValidationError {
    /// Status message shown when an operation of `class` is rejected.
    pub fn status_message(&self, class: OperationClass) -> String {
        if let ValidationError::AmountTooLarge { bits, .. } = self {
            return format!("Amount exceeds uint{} limit", bits);
        }
        match class {
            OperationClass::Deposit => "Invalid amount (>0) or missing parameters".to_string(),
            OperationClass::Transfer => {
                "Invalid amount (>0), recipient, or missing parameters".to_string()
            }
            OperationClass::Withdraw | OperationClass::Refresh => "Missing parameters".to_string(),
        }
    }
}

fn network_label(network_id: &Option<u64>) -> String {
    match network_id {
        Some(id) => id.to_string(),
        None => "<none>".to_string(),
    }
}

/// How an operation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Another operation of the same class was in flight; nothing happened.
    Skipped,
    /// Refused by validation before any network call.
    Rejected(ValidationError),
    /// The session changed mid-flight; results were discarded.
    Ignored,
    /// Finished and applied.
    Completed,
    /// A capability call failed or the transaction reverted.
    Failed(String),
}

impl OperationOutcome {
    /// Short label, used for logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            OperationOutcome::Skipped => "skipped",
            OperationOutcome::Rejected(_) => "rejected",
            OperationOutcome::Ignored => "ignored",
            OperationOutcome::Completed => "completed",
            OperationOutcome::Failed(_) => "failed",
        }
    }

    /// `true` for [`OperationOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, OperationOutcome::Completed)
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Rejected(e) => write!(f, "rejected: {}", e),
            OperationOutcome::Failed(e) => write!(f, "failed: {}", e),
            other => f.write_str(other.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages_follow_class() {
        let e = ValidationError::NonPositiveAmount(-5);
        assert_eq!(
            e.status_message(OperationClass::Deposit),
            "Invalid amount (>0) or missing parameters"
        );
        assert_eq!(
            e.status_message(OperationClass::Transfer),
            "Invalid amount (>0), recipient, or missing parameters"
        );
        assert_eq!(
            ValidationError::MissingCapability("signer").status_message(OperationClass::Withdraw),
            "Missing parameters"
        );
    }

    #[test]
    fn not_deployed_renders_plain_network_id() {
        assert_eq!(
            ValidationError::NotDeployed(Some(31337)).to_string(),
            "contract not deployed on network 31337"
        );
        assert_eq!(
            ValidationError::NotDeployed(None).to_string(),
            "contract not deployed on network <none>"
        );
    }

    #[test]
    fn width_overflow_names_the_width() {
        let e = ValidationError::AmountTooLarge {
            amount: i128::MAX,
            bits: 64,
        };
        assert_eq!(
            e.status_message(OperationClass::Deposit),
            "Amount exceeds uint64 limit"
        );
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(OperationOutcome::Skipped.label(), "skipped");
        assert_eq!(
            OperationOutcome::Failed("x".into()).to_string(),
            "failed: x"
        );
        assert!(OperationOutcome::Completed.is_completed());
    }
}
