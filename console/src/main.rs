// Copyright (c) 2026 Confidential P2P Ether contributors. MIT License.
// See LICENSE for details.

//! # ConfidentialP2PEther Console
//!
//! Entry point for the `cpe-console` binary. Parses CLI arguments,
//! initializes logging and metrics, and dispatches to a subcommand:
//!
//! - `simulate`    — run a scripted controller session on a simulated ledger
//! - `deployments` — print or query a deployment descriptor
//! - `version`     — print build version information

mod cli;
mod logging;
mod metrics;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use cpe_controller::config::network_name;
use cpe_controller::{DeploymentDescriptor, CONTRACT_NAME};

use cli::{Commands, CpeConsoleCli};
use logging::LogFormat;
use metrics::ConsoleMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CpeConsoleCli::parse();
    let format = LogFormat::from_str_lossy(&cli.log_format);

    match cli.command {
        Commands::Simulate(args) => {
            logging::init_logging("cpe_controller=info,cpe_console=info", format)
                .context("failed to install logging")?;
            simulate(args).await
        }
        Commands::Deployments(args) => {
            logging::init_logging("cpe_console=info", format)
                .context("failed to install logging")?;
            show_deployments(args)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs the scripted session, stopping early on Ctrl+C.
async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    let metrics = ConsoleMetrics::new().context("failed to register metrics")?;
    let print_metrics = args.metrics;

    tokio::select! {
        res = scenario::run(args, &metrics) => res?,
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            tracing::info!("interrupted, stopping scripted session");
        }
    }

    if print_metrics {
        let text = metrics.encode().context("failed to encode metrics")?;
        print!("{}", text);
    }
    Ok(())
}

/// Prints every descriptor entry, or the resolution of one chain id.
fn show_deployments(args: cli::DeploymentsArgs) -> Result<()> {
    let descriptor = DeploymentDescriptor::load(&args.deployments).with_context(|| {
        format!(
            "failed to load deployments from {}",
            args.deployments.display()
        )
    })?;
    tracing::debug!(entries = descriptor.len(), "descriptor loaded");

    if let Some(chain_id) = args.chain_id {
        match descriptor.resolve(chain_id) {
            Some(deployment) => println!(
                "{} {} ({})",
                deployment.network_id,
                deployment.address,
                deployment
                    .chain_name
                    .unwrap_or_else(|| network_name(chain_id))
            ),
            None => println!(
                "{} deployment not found for chainId={}.",
                CONTRACT_NAME, chain_id
            ),
        }
        return Ok(());
    }

    for (id, entry) in descriptor.entries() {
        let status = if descriptor.resolve(id).is_some() {
            "deployed"
        } else {
            "not deployed"
        };
        println!(
            "{:>10}  {}  {:<12}  {}",
            id,
            entry.address,
            entry.chain_name.clone().unwrap_or_else(|| network_name(id)),
            status
        );
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("cpe-console {}", env!("CARGO_PKG_VERSION"));
    println!("contract    {}", CONTRACT_NAME);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
