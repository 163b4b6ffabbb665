//! # Scripted Session
//!
//! Runs a controller through a fixed session against a simulated ledger:
//! connect, deposit, transfer, withdraw, then a deposit interrupted by a
//! network switch, then a switch back. The controller view is printed to
//! stdout after every step.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cpe_controller::config::network_name;
use cpe_controller::sim::{SimulatedLedger, SimulationConfig, HARDHAT_FIRST_CONTRACT};
use cpe_controller::{
    Address, Controller, ControllerConfig, ControllerView, DeploymentDescriptor, Handle,
    OperationClass, OperationOutcome, Session,
};

use crate::cli::SimulateArgs;
use crate::metrics::ConsoleMetrics;

/// Network the interrupting switch moves to. Never deployed in the script.
const DETOUR_NETWORK: u64 = 11155111;

/// Polling interval while waiting for background work.
const POLL: Duration = Duration::from_millis(10);

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let Some(path) = path else {
        return Ok(ControllerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read controller config {}", path.display()))?;
    ControllerConfig::from_json(&text)
        .with_context(|| format!("invalid controller config {}", path.display()))
}

fn load_deployments(path: Option<&Path>, network_id: u64) -> Result<DeploymentDescriptor> {
    match path {
        Some(path) => DeploymentDescriptor::load(path)
            .with_context(|| format!("failed to load deployments from {}", path.display())),
        None => Ok(DeploymentDescriptor::new().with_entry(
            network_id,
            HARDHAT_FIRST_CONTRACT,
            Some(network_name(network_id).as_str()),
        )),
    }
}

struct Scenario<'a> {
    controller: Controller,
    ledger: SimulatedLedger,
    metrics: &'a ConsoleMetrics,
    network_id: u64,
    settle: Duration,
    json: bool,
    step: usize,
}

impl Scenario<'_> {
    fn session(&self, owner: Address) -> Session {
        Session::new(self.network_id)
            .with_readonly(Arc::new(self.ledger.clone()))
            .with_events(Arc::new(self.ledger.clone()))
            .with_signer(Arc::new(self.ledger.signer(owner)))
            .with_encryption(Arc::new(self.ledger.encryption()))
    }

    async fn wait_idle(&self) {
        while self.controller.is_refreshing() {
            tokio::time::sleep(POLL).await;
        }
    }

    /// Gives event-driven refreshes time to land.
    async fn settle(&self) {
        tokio::time::sleep(self.settle).await;
        self.wait_idle().await;
    }

    async fn refresh(&self) -> OperationOutcome {
        self.wait_idle().await;
        self.metrics
            .observe(OperationClass::Refresh, self.controller.refresh_state())
            .await
    }

    fn report(&mut self, title: &str, outcome: Option<&OperationOutcome>) -> Result<()> {
        self.step += 1;
        match outcome {
            Some(outcome) => println!("[{}] {}: {}", self.step, title, outcome),
            None => println!("[{}] {}", self.step, title),
        }
        let view = self.controller.view();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&view)?);
        } else {
            println!("    {}", self.summary(&view));
        }
        Ok(())
    }

    fn summary(&self, view: &ControllerView) -> String {
        let flag = |b: bool| if b { 'y' } else { '-' };
        let refreshed = self
            .controller
            .account_state()
            .reference_time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "network={} deployed={} balance={} supply={} refreshed={} current={} \
             can[get,dep,xfer,wd]=[{},{},{},{}] message={:?}",
            view.network_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            view.is_deployed,
            short(view.encrypted_balance),
            short(view.encrypted_supply),
            refreshed,
            view.cache_current,
            flag(view.can_get_state),
            flag(view.can_deposit),
            flag(view.can_transfer),
            flag(view.can_withdraw),
            view.message,
        )
    }
}

fn short(handle: Option<Handle>) -> String {
    match handle {
        None => "?".to_string(),
        Some(h) if h.is_empty() => "empty".to_string(),
        Some(h) => format!("{}…", &h.to_hex()[..10]),
    }
}

/// Runs the scripted session.
pub async fn run(args: SimulateArgs, metrics: &ConsoleMetrics) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let deployments = load_deployments(args.deployments.as_deref(), args.network_id)?;
    let contract = deployments
        .resolve(args.network_id)
        .map(|d| d.address)
        .unwrap_or(HARDHAT_FIRST_CONTRACT);

    let ledger = SimulatedLedger::new(SimulationConfig {
        contract,
        confirmation_delay_ms: args.confirmation_ms,
        callback_delay_ms: args.callback_ms,
        ..SimulationConfig::default()
    });
    let settle = Duration::from_millis(
        config.settle_delay_ms + args.confirmation_ms + args.callback_ms + 100,
    );

    tracing::info!(
        network_id = args.network_id,
        contract = %contract,
        amount = args.amount,
        "starting scripted session"
    );

    let alice = Address::from_bytes([0xa1; 20]);
    let bob = Address::from_bytes([0xb0; 20]);
    let mut s = Scenario {
        controller: Controller::new(deployments, config),
        ledger,
        metrics,
        network_id: args.network_id,
        settle,
        json: args.json,
        step: 0,
    };

    s.controller.connect(s.session(alice));
    let outcome = s.refresh().await;
    s.report("connect and refresh", Some(&outcome))?;

    let deposit = s
        .metrics
        .observe(OperationClass::Deposit, s.controller.deposit(args.amount))
        .await;
    s.settle().await;
    s.report(&format!("deposit {} wei", args.amount), Some(&deposit))?;

    let quarter = args.amount / 4;
    let transfer = s
        .metrics
        .observe(
            OperationClass::Transfer,
            s.controller.transfer(quarter, &bob.to_hex()),
        )
        .await;
    s.settle().await;
    s.report(&format!("transfer {} wei to {}", quarter, bob), Some(&transfer))?;

    let withdraw = s
        .metrics
        .observe(OperationClass::Withdraw, s.controller.withdraw())
        .await;
    s.settle().await;
    s.report("withdraw", Some(&withdraw))?;

    // A deposit still settling when the network changes under it. The
    // deposit may settle without ever holding the guard (rejected amount,
    // undeployed network), in which case there is nothing to interrupt.
    let mut messages = s.controller.subscribe_messages();
    let mut background = {
        let controller = s.controller.clone();
        let metrics = s.metrics.clone();
        let amount = args.amount;
        tokio::spawn(async move {
            metrics
                .observe(OperationClass::Deposit, controller.deposit(amount))
                .await
        })
    };
    let settled_early = loop {
        if s.controller.is_depositing() {
            break None;
        }
        tokio::select! {
            finished = &mut background => break Some(finished),
            changed = messages.changed() => {
                if changed.is_err() {
                    break Some((&mut background).await);
                }
            }
        }
    };

    match settled_early {
        Some(finished) => {
            let outcome = finished.context("deposit task panicked")?;
            s.report("deposit settled before any network switch", Some(&outcome))?;
            tracing::info!(%outcome, "deposit never went in flight, skipping network switch");
        }
        None => {
            let detour = SimulatedLedger::default();
            s.controller.switch_network(
                DETOUR_NETWORK,
                Arc::new(detour.clone()),
                Some(Arc::new(detour)),
            );
            s.report(&format!("switch to {}", network_name(DETOUR_NETWORK)), None)?;
            let interrupted = background
                .await
                .context("interrupted deposit task panicked")?;
            s.report("deposit interrupted by network switch", Some(&interrupted))?;

            s.controller.switch_network(
                s.network_id,
                Arc::new(s.ledger.clone()),
                Some(Arc::new(s.ledger.clone())),
            );
            let outcome = s.refresh().await;
            s.report(&format!("switch back to {}", network_name(s.network_id)), Some(&outcome))?;
        }
    }

    s.controller.shutdown().await;
    tracing::info!(
        balance = s.ledger.cleartext_balance(alice),
        recipient = s.ledger.cleartext_balance(bob),
        supply = s.ledger.cleartext_supply(),
        "scripted session finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_deployments_register_the_hardhat_contract() {
        let deployments = load_deployments(None, 31337).unwrap();
        let resolved = deployments.resolve(31337).unwrap();
        assert_eq!(resolved.address, HARDHAT_FIRST_CONTRACT);
        assert_eq!(resolved.chain_name.as_deref(), Some("hardhat"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"settle_delay_ms": 5, "amount_width": "u64"}}"#).unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.settle_delay_ms, 5);
        assert_eq!(config.amount_width, cpe_controller::AmountWidth::U64);
        assert!(config.auto_refresh);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/cpe.json"))).unwrap_err();
        assert!(err.to_string().contains("failed to read controller config"));
    }

    #[test]
    fn short_handles() {
        assert_eq!(short(None), "?");
        assert_eq!(short(Some(Handle::EMPTY)), "empty");
        assert_eq!(short(Some(Handle::from_bytes([0xab; 32]))), "0xabababab…");
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_session_runs_to_completion() {
        let metrics = ConsoleMetrics::new().unwrap();
        let args = SimulateArgs {
            config: None,
            deployments: None,
            network_id: 31337,
            amount: 1000,
            confirmation_ms: 50,
            callback_ms: 50,
            json: false,
            metrics: true,
        };
        run(args, &metrics).await.unwrap();

        let count = |class: &str, outcome: &str| {
            metrics
                .operations_total
                .with_label_values(&[class, outcome])
                .get()
        };
        assert_eq!(count("deposit", "completed"), 1);
        assert_eq!(count("deposit", "ignored"), 1);
        assert_eq!(count("transfer", "completed"), 1);
        assert_eq!(count("withdraw", "completed"), 1);
        assert_eq!(metrics.operations_in_flight.get(), 0);
    }

    fn args(network_id: u64, amount: i128) -> SimulateArgs {
        SimulateArgs {
            config: None,
            deployments: None,
            network_id,
            amount,
            confirmation_ms: 50,
            callback_ms: 50,
            json: false,
            metrics: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_amount_session_finishes() {
        for amount in [0, -7] {
            let metrics = ConsoleMetrics::new().unwrap();
            tokio::time::timeout(Duration::from_secs(60), run(args(31337, amount), &metrics))
                .await
                .expect("session hung")
                .unwrap();

            let rejected = metrics
                .operations_total
                .with_label_values(&["deposit", "rejected"])
                .get();
            assert_eq!(rejected, 2);
            assert_eq!(metrics.operations_in_flight.get(), 0);
        }
    }
}
