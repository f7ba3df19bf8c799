//! CLI subcommand implementations for sol-sandbox

pub mod compile;
pub mod deploy;
pub mod invoke;
pub mod output;
pub mod serve;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sol_sandbox_core::SandboxConfig;
use sol_transport::network::{default_rpc_endpoint, infer_network, LOCAL_NETWORK};

/// Flags shared by every subcommand. Each one overrides the matching
/// `SOL_SANDBOX_*` environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Use the in-process chain instead of a cluster
    #[arg(long, global = true)]
    pub local: bool,

    /// Cluster RPC URL (default: derived from --network)
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Cluster name: devnet, testnet, mainnet-beta
    #[arg(long, global = true)]
    pub network: Option<String>,

    /// Funding keypair file (Solana CLI JSON format)
    #[arg(long, global = true)]
    pub keypair: Option<PathBuf>,

    /// Sandbox home directory (workspaces, logs, ledger)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn config(&self) -> Result<SandboxConfig> {
        let mut config = SandboxConfig::from_env()?;
        if let Some(home) = &self.home {
            config.paths = sol_sandbox_core::SandboxPaths::from_base(home);
        }
        if let Some(keypair) = &self.keypair {
            config.funding_keypair = Some(keypair.clone());
        }
        if self.local {
            config.local = true;
            config.network = LOCAL_NETWORK.to_string();
            return Ok(config);
        }
        match (&self.network, &self.rpc_url) {
            (Some(network), Some(url)) => {
                config.network = network.clone();
                config.rpc_url = url.clone();
            }
            (Some(network), None) => {
                config.network = network.clone();
                config.rpc_url = default_rpc_endpoint(network);
            }
            (None, Some(url)) => {
                config.network = infer_network(url);
                config.rpc_url = url.clone();
            }
            (None, None) => {}
        }
        Ok(config)
    }
}
