//! Operation context snapshots and staleness detection.
//!
//! Every operation captures an [`OperationContext`] synchronously when it is
//! accepted. Later, before submitting a transaction and before committing
//! fetched state, it asks a [`StalenessDetector`] whether the live session
//! still matches the snapshot. The detector does not read globals; it is
//! built from comparator closures over the live session, one per compared
//! dimension.

use std::fmt;

use crate::primitives::{Address, IdentityFingerprint, NetworkId};

/// Immutable snapshot of the session an operation started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    network_id: NetworkId,
    contract: Address,
    identity: IdentityFingerprint,
}

impl OperationContext {
    /// Captures a snapshot.
    pub fn new(network_id: NetworkId, contract: Address, identity: IdentityFingerprint) -> Self {
        Self {
            network_id,
            contract,
            identity,
        }
    }

    /// Network the operation started on.
    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    /// Contract the operation targets.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Signer identity the operation started with.
    pub fn identity(&self) -> IdentityFingerprint {
        self.identity
    }
}

type SameNetwork = Box<dyn Fn(NetworkId) -> bool + Send + Sync>;
type SameIdentity = Box<dyn Fn(&IdentityFingerprint) -> bool + Send + Sync>;
type CurrentContract = Box<dyn Fn() -> Option<Address> + Send + Sync>;

/// Compares a snapshot against the live session.
pub struct StalenessDetector {
    same_network: SameNetwork,
    same_identity: SameIdentity,
    current_contract: CurrentContract,
}

impl StalenessDetector {
    /// Builds a detector from three live-state comparators.
    pub fn new(
        same_network: impl Fn(NetworkId) -> bool + Send + Sync + 'static,
        same_identity: impl Fn(&IdentityFingerprint) -> bool + Send + Sync + 'static,
        current_contract: impl Fn() -> Option<Address> + Send + Sync + 'static,
    ) -> Self {
        Self {
            same_network: Box::new(same_network),
            same_identity: Box::new(same_identity),
            current_contract: Box::new(current_contract),
        }
    }

    /// `true` if the network, the contract address, or the signer identity
    /// differs from `context`.
    pub fn is_stale(&self, context: &OperationContext) -> bool {
        (self.current_contract)() != Some(context.contract)
            || !(self.same_network)(context.network_id)
            || !(self.same_identity)(&context.identity)
    }
}

impl fmt::Debug for StalenessDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StalenessDetector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    struct Live {
        network: NetworkId,
        contract: Option<Address>,
        identity: IdentityFingerprint,
    }

    fn detector(live: &Arc<RwLock<Live>>) -> StalenessDetector {
        let (n, i, c) = (Arc::clone(live), Arc::clone(live), Arc::clone(live));
        StalenessDetector::new(
            move |id| n.read().network == id,
            move |fp| i.read().identity == *fp,
            move || c.read().contract,
        )
    }

    fn setup() -> (Arc<RwLock<Live>>, OperationContext) {
        let live = Live {
            network: 31337,
            contract: Some(Address::from_bytes([1; 20])),
            identity: IdentityFingerprint::mint(),
        };
        let ctx = OperationContext::new(live.network, live.contract.unwrap(), live.identity);
        (Arc::new(RwLock::new(live)), ctx)
    }

    #[test]
    fn unchanged_session_is_fresh() {
        let (live, ctx) = setup();
        assert!(!detector(&live).is_stale(&ctx));
    }

    #[test]
    fn network_switch_is_stale() {
        let (live, ctx) = setup();
        let d = detector(&live);
        live.write().network = 11155111;
        assert!(d.is_stale(&ctx));
    }

    #[test]
    fn identity_switch_is_stale() {
        let (live, ctx) = setup();
        let d = detector(&live);
        live.write().identity = IdentityFingerprint::mint();
        assert!(d.is_stale(&ctx));
    }

    #[test]
    fn contract_change_or_loss_is_stale() {
        let (live, ctx) = setup();
        let d = detector(&live);
        live.write().contract = Some(Address::from_bytes([2; 20]));
        assert!(d.is_stale(&ctx));
        live.write().contract = None;
        assert!(d.is_stale(&ctx));
    }

    #[test]
    fn switching_back_is_fresh_again() {
        let (live, ctx) = setup();
        let d = detector(&live);
        live.write().network = 1;
        assert!(d.is_stale(&ctx));
        live.write().network = 31337;
        assert!(!d.is_stale(&ctx));
    }
}
