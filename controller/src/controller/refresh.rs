//! State refresh: read the identity's encrypted balance and the contract's
//! encrypted supply, then commit them to the cache if the session has not
//! moved in the meantime.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::{CapabilityError, ReadonlyAccess, Signer};
use crate::config::CONTRACT_NAME;
use crate::operation::{OperationClass, OperationContext, OperationOutcome, ValidationError};
use crate::state::FetchedState;

use super::Controller;

struct PreparedRefresh {
    context: OperationContext,
    readonly: Arc<dyn ReadonlyAccess>,
    signer: Arc<dyn Signer>,
}

impl Controller {
    /// Reads current ledger state and updates the cache.
    ///
    /// A no-op ([`OperationOutcome::Skipped`]) while another refresh is in
    /// flight. Fetched values are discarded ([`OperationOutcome::Ignored`])
    /// when the network, contract or identity changed before the commit.
    pub async fn refresh_state(&self) -> OperationOutcome {
        let class = OperationClass::Refresh;
        let prepared = match self.prepare_refresh() {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(error = %e, "missing required parameters for refresh");
                return OperationOutcome::Rejected(e);
            }
        };
        let Some(_ticket) = self.inner.guard.acquire(class) else {
            debug!("already refreshing, skipping");
            return OperationOutcome::Skipped;
        };
        debug!(
            network_id = prepared.context.network_id(),
            contract = %prepared.context.contract(),
            "starting refresh"
        );

        let fetched = match fetch_state(&prepared).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "state refresh failed");
                self.set_message(format!("{} state refresh failed! error={}", CONTRACT_NAME, e));
                return OperationOutcome::Failed(e.to_string());
            }
        };

        let detector = self.staleness_detector();
        let applied = self
            .inner
            .cache
            .commit_if(fetched, || !detector.is_stale(&prepared.context));

        if applied {
            info!(
                timestamp = fetched.timestamp,
                has_balance = !fetched.balance.is_empty(),
                "state refreshed"
            );
            OperationOutcome::Completed
        } else {
            info!("session changed during refresh, discarding fetched state");
            OperationOutcome::Ignored
        }
    }

    fn prepare_refresh(&self) -> Result<PreparedRefresh, ValidationError> {
        let live = self.inner.session.read();
        let context = live
            .operation_context()
            .ok_or_else(|| match live.deployment {
                None => ValidationError::NotDeployed(live.network_id),
                Some(_) => ValidationError::MissingCapability("signer"),
            })?;
        let readonly = live
            .readonly
            .clone()
            .ok_or(ValidationError::MissingCapability("readonly access"))?;
        let signer = live
            .signer
            .as_ref()
            .map(|slot| Arc::clone(&slot.signer))
            .ok_or(ValidationError::MissingCapability("signer"))?;
        Ok(PreparedRefresh {
            context,
            readonly,
            signer,
        })
    }
}

async fn fetch_state(prepared: &PreparedRefresh) -> Result<FetchedState, CapabilityError> {
    let contract = prepared.context.contract();

    let timestamp = prepared.readonly.latest_block_timestamp().await?;
    let account = prepared.signer.address().await?;
    debug!(%account, timestamp, "reading encrypted state");

    let (balance, supply) = tokio::try_join!(
        prepared.readonly.balance_of(contract, account),
        prepared.readonly.total_supply(contract),
    )?;
    debug!(%balance, %supply, "encrypted handles");

    Ok(FetchedState {
        balance,
        supply,
        timestamp,
    })
}
