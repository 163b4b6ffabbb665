//! # Operation Controller
//!
//! [`Controller`] is the long-lived client-side view of one identity's
//! position in the ConfidentialP2PEther ledger. It owns the only shared
//! mutable state in the system (the account-state cache, the four guard
//! flags, and the status message) and runs every operation against it:
//!
//! ```text
//! refresh.rs  — refresh_state(): read balance/supply handles, commit if fresh
//! submit.rs   — deposit()/transfer()/withdraw(): encrypt, submit, confirm
//! reactor.rs  — contract event subscription that triggers refreshes
//! view.rs     — can_* predicates and the serializable ControllerView
//! ```
//!
//! ## Sessions
//!
//! The live context (network, readonly access, event source, signer,
//! encryption engine) is a [`Session`] installed with [`Controller::connect`]
//! and mutated by the `switch_*` methods. Every change re-resolves the
//! deployment, flags the cache as outdated when the network or identity
//! moved, re-establishes the event subscription when its inputs moved, and
//! (when configured) kicks off a background refresh.
//!
//! ## Concurrency
//!
//! Operations are plain `async fn`s on a cheaply clonable handle. Guard
//! checks and context capture happen before the first `.await`, so two
//! invocations raced on the same runtime cannot both pass. Operations of
//! different classes overlap freely; consistency between them comes only
//! from the staleness check at commit time.

mod reactor;
mod refresh;
mod submit;
mod view;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::capability::{EncryptionCapability, EventSource, ReadonlyAccess, Signer};
use crate::config::{ControllerConfig, CONTRACT_NAME};
use crate::deployment::{Deployment, DeploymentDescriptor};
use crate::operation::{ConcurrencyGuard, OperationContext, StalenessDetector};
use crate::primitives::{Address, IdentityFingerprint, NetworkId};
use crate::state::AccountStateCache;

use reactor::EventReactor;

pub use view::ControllerView;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Capabilities supplied by the wallet/provider layer for one network.
#[derive(Clone)]
pub struct Session {
    network_id: NetworkId,
    readonly: Option<Arc<dyn ReadonlyAccess>>,
    events: Option<Arc<dyn EventSource>>,
    signer: Option<Arc<dyn Signer>>,
    encryption: Option<Arc<dyn EncryptionCapability>>,
}

impl Session {
    /// A session on `network_id` with no capabilities yet.
    pub fn new(network_id: NetworkId) -> Self {
        Self {
            network_id,
            readonly: None,
            events: None,
            signer: None,
            encryption: None,
        }
    }

    /// Sets the readonly access capability.
    pub fn with_readonly(mut self, readonly: Arc<dyn ReadonlyAccess>) -> Self {
        self.readonly = Some(readonly);
        self
    }

    /// Sets the event source.
    pub fn with_events(mut self, events: Arc<dyn EventSource>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the signer.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Sets the encryption capability.
    pub fn with_encryption(mut self, encryption: Arc<dyn EncryptionCapability>) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

#[derive(Clone)]
struct SignerSlot {
    signer: Arc<dyn Signer>,
    fingerprint: IdentityFingerprint,
}

impl SignerSlot {
    fn install(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            fingerprint: IdentityFingerprint::mint(),
        }
    }
}

/// Inputs the event subscription depends on. A change in any of them
/// requires tearing the subscription down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReactorKey {
    contract: Address,
    provider_epoch: u64,
    identity: IdentityFingerprint,
}

/// Inputs the staleness detector compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContextKey {
    network_id: Option<NetworkId>,
    contract: Option<Address>,
    identity: Option<IdentityFingerprint>,
    provider_epoch: u64,
}

#[derive(Default)]
struct LiveSession {
    network_id: Option<NetworkId>,
    deployment: Option<Deployment>,
    readonly: Option<Arc<dyn ReadonlyAccess>>,
    events: Option<Arc<dyn EventSource>>,
    provider_epoch: u64,
    signer: Option<SignerSlot>,
    encryption: Option<Arc<dyn EncryptionCapability>>,
}

impl LiveSession {
    fn contract(&self) -> Option<Address> {
        self.deployment.as_ref().map(|d| d.address)
    }

    fn identity(&self) -> Option<IdentityFingerprint> {
        self.signer.as_ref().map(|s| s.fingerprint)
    }

    fn context_key(&self) -> ContextKey {
        ContextKey {
            network_id: self.network_id,
            contract: self.contract(),
            identity: self.identity(),
            provider_epoch: self.provider_epoch,
        }
    }

    fn reactor_key(&self) -> Option<ReactorKey> {
        self.events.as_ref()?;
        Some(ReactorKey {
            contract: self.contract()?,
            provider_epoch: self.provider_epoch,
            identity: self.identity()?,
        })
    }

    /// Captures an operation snapshot. `None` when there is no deployment or
    /// no signer to snapshot.
    /// The network id is the live one the staleness detector compares
    /// against, never the descriptor's recorded chain id.
    fn operation_context(&self) -> Option<OperationContext> {
        let network_id = self.network_id?;
        let deployment = self.deployment.as_ref()?;
        let identity = self.identity()?;
        Some(OperationContext::new(network_id, deployment.address, identity))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    config: ControllerConfig,
    deployments: DeploymentDescriptor,
    session: RwLock<LiveSession>,
    guard: ConcurrencyGuard,
    cache: AccountStateCache,
    message: watch::Sender<String>,
    reactor: Mutex<Option<EventReactor>>,
}

/// Handle to a controller. Clones share the same state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.read();
        f.debug_struct("Controller")
            .field("network_id", &session.network_id)
            .field("contract", &session.contract())
            .field("in_flight", &self.inner.guard.in_flight())
            .finish()
    }
}

impl Controller {
    /// Creates a controller with an empty cache and no session.
    pub fn new(deployments: DeploymentDescriptor, config: ControllerConfig) -> Self {
        let (message, _) = watch::channel(String::new());
        Self {
            inner: Arc::new(Inner {
                config,
                deployments,
                session: RwLock::new(LiveSession::default()),
                guard: ConcurrencyGuard::new(),
                cache: AccountStateCache::new(),
                message,
                reactor: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// The controller's configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // -- Session management ---------------------------------------------------

    /// Installs a whole new session, replacing every capability.
    pub fn connect(&self, session: Session) {
        self.change_session(move |live| {
            live.network_id = Some(session.network_id);
            live.readonly = session.readonly;
            live.events = session.events;
            live.provider_epoch += 1;
            live.signer = session.signer.map(SignerSlot::install);
            live.encryption = session.encryption;
        });
    }

    /// Moves to another network with its own readonly access and event
    /// source. Signer and encryption capability are kept.
    pub fn switch_network(
        &self,
        network_id: NetworkId,
        readonly: Arc<dyn ReadonlyAccess>,
        events: Option<Arc<dyn EventSource>>,
    ) {
        self.change_session(move |live| {
            live.network_id = Some(network_id);
            live.readonly = Some(readonly);
            live.events = events;
            live.provider_epoch += 1;
        });
    }

    /// Installs (or removes) the signer. Installing always counts as an
    /// identity change, even for the same account.
    pub fn switch_signer(&self, signer: Option<Arc<dyn Signer>>) {
        self.change_session(move |live| {
            live.signer = signer.map(SignerSlot::install);
        });
    }

    /// Installs (or removes) the encryption capability.
    pub fn set_encryption(&self, encryption: Option<Arc<dyn EncryptionCapability>>) {
        self.inner.session.write().encryption = encryption;
    }

    /// Drops every capability.
    pub fn disconnect(&self) {
        self.change_session(|live| {
            let epoch = live.provider_epoch + 1;
            *live = LiveSession {
                provider_epoch: epoch,
                ..LiveSession::default()
            };
        });
    }

    fn change_session(&self, apply: impl FnOnce(&mut LiveSession)) {
        let (before, after, reactor_changed, target_changed, network_id, deployment) = {
            let mut live = self.inner.session.write();
            let before = live.context_key();
            let reactor_before = live.reactor_key();
            let target_before = (live.network_id, live.deployment.clone());

            apply(&mut live);
            live.deployment = live
                .network_id
                .and_then(|id| self.inner.deployments.resolve(id));

            let after = live.context_key();
            let target_changed = target_before != (live.network_id, live.deployment.clone());
            (
                before,
                after,
                reactor_before != live.reactor_key(),
                target_changed,
                live.network_id,
                live.deployment.clone(),
            )
        };

        match (&deployment, network_id) {
            _ if !target_changed => {}
            (Some(d), _) => info!(
                network_id = d.network_id,
                chain = d.chain_name.as_deref().unwrap_or("?"),
                contract = %d.address,
                "session updated"
            ),
            (None, Some(id)) => {
                warn!(network_id = id, "no deployment for network");
                self.set_message(format!(
                    "{} deployment not found for chainId={}.",
                    CONTRACT_NAME, id
                ));
            }
            (None, None) => debug!("session cleared"),
        }

        let context_changed = before != after;
        if context_changed {
            self.inner.cache.mark_outdated();
        }
        if reactor_changed {
            self.restart_reactor();
        }
        if context_changed && self.inner.config.auto_refresh {
            self.spawn_refresh();
        }
    }

    fn restart_reactor(&self) {
        let mut slot = self.inner.reactor.lock();
        if let Some(old) = slot.take() {
            old.stop();
        }

        let (events, signer, contract) = {
            let live = self.inner.session.read();
            match (live.reactor_key(), live.events.clone(), live.signer.clone()) {
                (Some(key), Some(events), Some(signer)) => (events, signer.signer, key.contract),
                _ => return,
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, event subscription not started");
            return;
        };

        *slot = Some(EventReactor::spawn(
            &runtime,
            Arc::downgrade(&self.inner),
            events,
            signer,
            contract,
            self.inner.config.event_channel_capacity,
        ));
    }

    fn spawn_refresh(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let controller = self.clone();
        runtime.spawn(async move {
            controller.refresh_state().await;
        });
    }

    /// Stops the event subscription and waits for it to unsubscribe.
    pub async fn shutdown(&self) {
        let reactor = self.inner.reactor.lock().take();
        if let Some(reactor) = reactor {
            reactor.shutdown().await;
        }
        info!("controller shut down");
    }

    // -- Staleness ------------------------------------------------------------

    /// Builds a detector whose comparators read the live session.
    pub fn staleness_detector(&self) -> StalenessDetector {
        let network = Arc::clone(&self.inner);
        let identity = Arc::clone(&self.inner);
        let contract = Arc::clone(&self.inner);
        StalenessDetector::new(
            move |id| network.session.read().network_id == Some(id),
            move |fp| identity.session.read().identity().as_ref() == Some(fp),
            move || contract.session.read().contract(),
        )
    }

    // -- Status ---------------------------------------------------------------

    /// Current status message.
    pub fn message(&self) -> String {
        self.inner.message.borrow().clone()
    }

    /// Receiver that observes every status message update.
    pub fn subscribe_messages(&self) -> watch::Receiver<String> {
        self.inner.message.subscribe()
    }

    fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "status");
        self.inner.message.send_replace(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedLedger;

    fn no_refresh() -> ControllerConfig {
        ControllerConfig {
            auto_refresh: false,
            settle_delay_ms: 0,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn missing_deployment_sets_message() {
        let controller = Controller::new(DeploymentDescriptor::new(), no_refresh());
        controller.connect(Session::new(1));
        assert_eq!(
            controller.message(),
            "ConfidentialP2PEther deployment not found for chainId=1."
        );
        assert!(!controller.is_deployed());
    }

    #[test]
    fn network_switch_outdates_cache_and_detector() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = Controller::new(deployments, no_refresh());
        let alice = ledger.signer(Address::from_bytes([0xa1; 20]));
        controller.connect(
            Session::new(31337)
                .with_readonly(Arc::new(ledger.clone()))
                .with_signer(Arc::new(alice)),
        );

        let ctx = controller.inner.session.read().operation_context().unwrap();
        let detector = controller.staleness_detector();
        assert!(!detector.is_stale(&ctx));

        controller.switch_network(1, Arc::new(ledger.clone()), None);
        assert!(detector.is_stale(&ctx));
        assert!(!controller.inner.cache.is_current());
        assert!(!controller.is_deployed());
    }

    #[test]
    fn reinstalling_same_signer_is_an_identity_change() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = Controller::new(deployments, no_refresh());
        let alice: Arc<dyn Signer> = Arc::new(ledger.signer(Address::from_bytes([0xa1; 20])));
        controller.connect(Session::new(31337).with_signer(Arc::clone(&alice)));

        let ctx = controller.inner.session.read().operation_context().unwrap();
        controller.switch_signer(Some(alice));
        assert!(controller.staleness_detector().is_stale(&ctx));
    }

    #[test]
    fn encryption_swap_keeps_context() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = Controller::new(deployments, no_refresh());
        controller.connect(
            Session::new(31337).with_signer(Arc::new(ledger.signer(Address::from_bytes([1; 20])))),
        );
        let ctx = controller.inner.session.read().operation_context().unwrap();
        controller.set_encryption(Some(Arc::new(ledger.encryption())));
        assert!(!controller.staleness_detector().is_stale(&ctx));
    }

    #[test]
    fn disconnect_clears_everything() {
        let ledger = SimulatedLedger::default();
        let deployments = DeploymentDescriptor::new().with_entry(31337, ledger.contract(), None);
        let controller = Controller::new(deployments, no_refresh());
        controller.connect(
            Session::new(31337).with_signer(Arc::new(ledger.signer(Address::from_bytes([1; 20])))),
        );
        controller.disconnect();
        assert!(!controller.is_deployed());
        assert!(controller.inner.session.read().operation_context().is_none());
    }

    #[test]
    fn missing_deployment_is_reported_once() {
        let ledger = SimulatedLedger::default();
        let controller = Controller::new(DeploymentDescriptor::new(), no_refresh());
        controller.connect(Session::new(1));
        let mut messages = controller.subscribe_messages();
        messages.borrow_and_update();

        controller.switch_signer(Some(Arc::new(ledger.signer(Address::from_bytes([1; 20])))));
        controller.set_encryption(Some(Arc::new(ledger.encryption())));
        assert!(!messages.has_changed().unwrap());

        controller.switch_network(5, Arc::new(ledger.clone()), None);
        assert!(messages.has_changed().unwrap());
        assert_eq!(
            *messages.borrow_and_update(),
            "ConfidentialP2PEther deployment not found for chainId=5."
        );
    }

    #[test]
    fn snapshot_uses_live_network_id() {
        let ledger = SimulatedLedger::default();
        let json = format!(
            r#"{{"31337": {{"address": "{}", "chainId": 1337}}}}"#,
            ledger.contract()
        );
        let deployments = DeploymentDescriptor::from_json(&json).unwrap();
        let controller = Controller::new(deployments, no_refresh());
        controller.connect(
            Session::new(31337).with_signer(Arc::new(ledger.signer(Address::from_bytes([1; 20])))),
        );

        let ctx = controller.inner.session.read().operation_context().unwrap();
        assert_eq!(ctx.network_id(), 31337);
        assert!(!controller.staleness_detector().is_stale(&ctx));
    }
}
