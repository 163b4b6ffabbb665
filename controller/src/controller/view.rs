//! Observable surface for the presentation layer: per-field accessors, the
//! `can_*` predicates, and a serializable snapshot of all of them.

use serde::Serialize;

use crate::operation::OperationClass;
use crate::primitives::{Address, Handle, NetworkId};
use crate::state::AccountState;

use super::Controller;

/// Point-in-time snapshot of every observable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerView {
    pub network_id: Option<NetworkId>,
    pub contract_address: Option<Address>,
    pub chain_name: Option<String>,
    pub is_deployed: bool,
    pub has_balance: bool,
    pub encrypted_balance: Option<Handle>,
    pub encrypted_supply: Option<Handle>,
    pub reference_timestamp: u64,
    pub cache_current: bool,
    pub is_refreshing: bool,
    pub is_depositing: bool,
    pub is_transferring: bool,
    pub is_withdrawing: bool,
    pub can_get_state: bool,
    pub can_deposit: bool,
    pub can_transfer: bool,
    pub can_withdraw: bool,
    pub message: String,
}

impl Controller {
    /// Contract address on the active network, if deployed.
    pub fn contract_address(&self) -> Option<Address> {
        self.inner.session.read().contract()
    }

    /// `true` when the active network has a deployment.
    pub fn is_deployed(&self) -> bool {
        self.inner.session.read().deployment.is_some()
    }

    /// Copy of the cached account state.
    pub fn account_state(&self) -> AccountState {
        self.inner.cache.snapshot()
    }

    /// `true` when the encrypted balance handle is non-empty.
    pub fn has_balance(&self) -> bool {
        self.inner.cache.snapshot().has_balance
    }

    /// `true` while a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.guard.is_held(OperationClass::Refresh)
    }

    /// `true` while a deposit is in flight.
    pub fn is_depositing(&self) -> bool {
        self.inner.guard.is_held(OperationClass::Deposit)
    }

    /// `true` while a transfer is in flight.
    pub fn is_transferring(&self) -> bool {
        self.inner.guard.is_held(OperationClass::Transfer)
    }

    /// `true` while a withdraw is in flight.
    pub fn is_withdrawing(&self) -> bool {
        self.inner.guard.is_held(OperationClass::Withdraw)
    }

    /// Whether a refresh could start now.
    pub fn can_get_state(&self) -> bool {
        let live = self.inner.session.read();
        live.deployment.is_some()
            && live.readonly.is_some()
            && live.signer.is_some()
            && !self.is_refreshing()
    }

    /// Whether a deposit could start now.
    pub fn can_deposit(&self) -> bool {
        let live = self.inner.session.read();
        live.deployment.is_some()
            && live.encryption.is_some()
            && live.signer.is_some()
            && !self.is_refreshing()
            && !self.is_depositing()
    }

    /// Whether a transfer could start now. Requires a current, non-empty
    /// balance.
    pub fn can_transfer(&self) -> bool {
        let funded = self.inner.cache.is_current() && self.has_balance();
        let live = self.inner.session.read();
        live.deployment.is_some()
            && live.encryption.is_some()
            && live.signer.is_some()
            && !self.is_refreshing()
            && !self.is_transferring()
            && funded
    }

    /// Whether a withdraw could start now. Requires a current, non-empty
    /// balance.
    pub fn can_withdraw(&self) -> bool {
        let funded = self.inner.cache.is_current() && self.has_balance();
        let live = self.inner.session.read();
        live.deployment.is_some()
            && live.signer.is_some()
            && !self.is_refreshing()
            && !self.is_withdrawing()
            && funded
    }

    /// Snapshot of every observable field.
    pub fn view(&self) -> ControllerView {
        let state = self.account_state();
        let (network_id, contract_address, chain_name) = {
            let live = self.inner.session.read();
            (
                live.network_id,
                live.contract(),
                live.deployment.as_ref().and_then(|d| d.chain_name.clone()),
            )
        };
        ControllerView {
            network_id,
            contract_address,
            chain_name,
            is_deployed: contract_address.is_some(),
            has_balance: state.has_balance,
            encrypted_balance: state.encrypted_balance,
            encrypted_supply: state.encrypted_supply,
            reference_timestamp: state.reference_timestamp,
            cache_current: self.inner.cache.is_current(),
            is_refreshing: self.is_refreshing(),
            is_depositing: self.is_depositing(),
            is_transferring: self.is_transferring(),
            is_withdrawing: self.is_withdrawing(),
            can_get_state: self.can_get_state(),
            can_deposit: self.can_deposit(),
            can_transfer: self.can_transfer(),
            can_withdraw: self.can_withdraw(),
            message: self.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::Session;
    use crate::deployment::DeploymentDescriptor;
    use crate::sim::SimulatedLedger;

    fn connected(deployments: DeploymentDescriptor, ledger: &SimulatedLedger) -> Controller {
        let controller = Controller::new(
            deployments,
            ControllerConfig {
                auto_refresh: false,
                ..ControllerConfig::default()
            },
        );
        controller.connect(
            Session::new(31337)
                .with_readonly(Arc::new(ledger.clone()))
                .with_signer(Arc::new(ledger.signer(Address::from_bytes([0xa1; 20]))))
                .with_encryption(Arc::new(ledger.encryption())),
        );
        controller
    }

    #[test]
    fn undeployed_network_disables_everything() {
        let ledger = SimulatedLedger::default();
        let controller = connected(DeploymentDescriptor::new(), &ledger);
        let view = controller.view();
        assert!(!view.is_deployed);
        assert!(!view.can_get_state);
        assert!(!view.can_deposit);
        assert!(!view.can_transfer);
        assert!(!view.can_withdraw);
    }

    #[test]
    fn fresh_session_can_read_and_deposit_only() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), Some("hardhat"));
        let controller = connected(deployments, &ledger);
        let view = controller.view();
        assert!(view.is_deployed);
        assert_eq!(view.chain_name.as_deref(), Some("hardhat"));
        assert!(view.can_get_state);
        assert!(view.can_deposit);
        assert!(!view.can_transfer);
        assert!(!view.can_withdraw);
    }

    #[test]
    fn refreshing_blocks_submits() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = connected(deployments, &ledger);
        let _held = controller.inner.guard.acquire(OperationClass::Refresh).unwrap();
        assert!(controller.is_refreshing());
        assert!(!controller.can_get_state());
        assert!(!controller.can_deposit());
    }

    #[test]
    fn view_serializes_handles_as_hex() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = connected(deployments, &ledger);
        let json = serde_json::to_value(controller.view()).unwrap();
        assert_eq!(json["contract_address"], ledger.contract().to_hex());
        assert_eq!(json["is_deployed"], true);
        assert!(json["encrypted_balance"].is_null());
    }
}
