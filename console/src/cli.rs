//! # CLI Interface
//!
//! Defines the command-line argument structure for `cpe-console` using
//! `clap` derive. Supports three subcommands: `simulate`, `deployments`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ConfidentialP2PEther console.
///
/// Drives the operation controller against an in-process simulated ledger
/// and inspects deployment descriptors.
#[derive(Parser, Debug)]
#[command(
    name = "cpe-console",
    about = "ConfidentialP2PEther controller console",
    version,
    propagate_version = true
)]
pub struct CpeConsoleCli {
    /// Log output format: `pretty` or `json`. Logs go to stderr.
    #[arg(long, global = true, env = "CPE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the console binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scripted session against a simulated ledger, printing the
    /// controller view after every step.
    Simulate(SimulateArgs),
    /// Print a deployment descriptor, or resolve one chain id from it.
    Deployments(DeploymentsArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Path to a controller configuration file (JSON).
    ///
    /// Missing fields take their defaults.
    #[arg(long, short = 'c', env = "CPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a deployment descriptor (JSON).
    ///
    /// When omitted, the simulated contract is registered on the hardhat
    /// network (31337).
    #[arg(long, short = 'd', env = "CPE_DEPLOYMENTS")]
    pub deployments: Option<PathBuf>,

    /// Network the session connects to.
    #[arg(long, default_value_t = 31337)]
    pub network_id: u64,

    /// Deposit amount in wei. A quarter of it is transferred.
    #[arg(long, default_value_t = 1_000_000)]
    pub amount: i128,

    /// Simulated confirmation latency in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub confirmation_ms: u64,

    /// Simulated settlement callback delay in milliseconds.
    #[arg(long, default_value_t = 300)]
    pub callback_ms: u64,

    /// Print each view as JSON instead of the summary line.
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics at the end of the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for the `deployments` subcommand.
#[derive(Parser, Debug)]
pub struct DeploymentsArgs {
    /// Path to the deployment descriptor (JSON).
    #[arg(long, short = 'd', env = "CPE_DEPLOYMENTS")]
    pub deployments: PathBuf,

    /// Resolve only this chain id.
    #[arg(long)]
    pub chain_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        CpeConsoleCli::command().debug_assert();
    }

    #[test]
    fn simulate_defaults() {
        let cli = CpeConsoleCli::try_parse_from(["cpe-console", "simulate", "--metrics"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert!(args.metrics);
                assert_eq!(args.network_id, 31337);
                assert_eq!(args.amount, 1_000_000);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.log_format, "pretty");
    }

    #[test]
    fn deployments_requires_a_descriptor() {
        std::env::remove_var("CPE_DEPLOYMENTS");
        assert!(CpeConsoleCli::try_parse_from(["cpe-console", "deployments"]).is_err());
    }
}
