//! Contract event subscription.
//!
//! One [`EventReactor`] exists per (contract, provider, identity) triple. It
//! subscribes to the five ledger event kinds filtered to the identity's
//! address and, for every event, updates the status message and runs a
//! refresh. Events are handled one at a time; a burst queues in the
//! subscription channels rather than racing refreshes against each other.
//!
//! ## Lifecycle
//!
//! The task watches a `tokio::sync::watch` shutdown flag. [`EventReactor::stop`]
//! (also run on drop) flips it; the task then finishes the event it is
//! handling, unsubscribes every filter, and exits. The reactor holds only a
//! weak reference to the controller, so dropping the last controller handle
//! tears it down.

use std::sync::{Arc, Weak};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability::{EventFilter, EventKind, EventSource, LedgerEvent, Signer};
use crate::primitives::Address;

use super::{Controller, Inner};

pub(crate) struct EventReactor {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl EventReactor {
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        controller: Weak<Inner>,
        source: Arc<dyn EventSource>,
        signer: Arc<dyn Signer>,
        contract: Address,
        capacity: usize,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run(
            controller,
            source,
            signer,
            contract,
            capacity,
            shutdown_rx,
        ));
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Signals the task to unsubscribe and exit. Does not wait.
    pub(crate) fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signals the task and waits for it to finish unsubscribing.
    pub(crate) async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "event reactor task ended abnormally");
            }
        }
    }
}

impl Drop for EventReactor {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn receiver_stream(rx: mpsc::Receiver<LedgerEvent>) -> BoxStream<'static, LedgerEvent> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed()
}

async fn run(
    controller: Weak<Inner>,
    source: Arc<dyn EventSource>,
    signer: Arc<dyn Signer>,
    contract: Address,
    capacity: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let account = match signer.address().await {
        Ok(account) => account,
        Err(e) => {
            warn!(error = %e, "cannot resolve signer address, events disabled");
            return;
        }
    };

    let mut ids = Vec::with_capacity(EventKind::ALL.len());
    let mut streams = Vec::with_capacity(EventKind::ALL.len());
    for kind in EventKind::ALL {
        let filter = EventFilter {
            contract,
            kind,
            account,
        };
        match source.subscribe(filter, capacity).await {
            Ok(sub) => {
                ids.push(sub.id);
                streams.push(receiver_stream(sub.events));
            }
            Err(e) => warn!(%kind, error = %e, "event subscription failed"),
        }
    }
    info!(%contract, %account, subscriptions = ids.len(), "listening for ledger events");

    let mut events = stream::select_all(streams);
    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = events.next() => {
                    let Some(event) = next else {
                        debug!("all event streams closed");
                        break;
                    };
                    let Some(inner) = controller.upgrade() else {
                        break;
                    };
                    Controller::from_inner(inner).handle_event(&event).await;
                }
            }
        }
    }

    for id in ids {
        if let Err(e) = source.unsubscribe(id).await {
            warn!(?id, error = %e, "unsubscribe failed");
        }
    }
    debug!(%contract, %account, "event subscription torn down");
}

impl Controller {
    async fn handle_event(&self, event: &LedgerEvent) {
        info!(
            kind = %event.kind,
            account = %event.account,
            block = event.block_number,
            "ledger event received"
        );
        self.set_message(event.kind.status_message());
        self.refresh_state().await;
    }
}
