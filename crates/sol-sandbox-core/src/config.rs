//! Runtime configuration, read from `SOL_SANDBOX_*` environment variables.
//!
//! CLI flags override individual fields after [`SandboxConfig::from_env`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sol_sandbox_types::env_utils::{
    env_bool, env_command, env_string, env_string_or, env_var, env_var_or,
};
use sol_sandbox_types::instruction::DEFAULT_LOADER_ID;
use sol_sandbox_types::{Pubkey, RetryConfig};
use sol_transport::network::{default_rpc_endpoint, infer_network, LOCAL_NETWORK};
use sol_transport::Commitment;

use crate::paths::{default_paths, SandboxPaths};

/// How the toolchain process is confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Run the toolchain directly on the host inside the workspace directory.
    /// Only for development and tests; the build can read host files.
    None,
    /// Wrap the toolchain in `bwrap` with fresh namespaces.
    #[default]
    Bubblewrap,
}

impl FromStr for IsolationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "bubblewrap" | "bwrap" => Ok(Self::Bubblewrap),
            other => Err(anyhow!("unknown isolation mode '{other}' (expected none|bubblewrap)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub paths: SandboxPaths,
    pub rpc_url: String,
    pub network: String,
    pub commitment: Commitment,
    /// Solana CLI JSON keypair file paying for deployments.
    pub funding_keypair: Option<PathBuf>,
    pub loader_id: Pubkey,
    pub toolchain_command: Vec<String>,
    pub isolation: IsolationMode,
    /// Host paths bound read-only into the bubblewrap sandbox.
    pub toolchain_paths: Vec<PathBuf>,
    pub cargo_home: Option<PathBuf>,
    pub build_timeout: Duration,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    /// Lamports reserved on top of rent for transaction fees.
    pub fee_allowance: u64,
    pub artifact_capacity: usize,
    pub listen_addr: SocketAddr,
    pub body_limit_bytes: usize,
    /// Deploy against the in-process chain instead of a cluster.
    pub local: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let network = "devnet".to_string();
        Self {
            paths: default_paths(),
            rpc_url: default_rpc_endpoint(&network),
            network,
            commitment: Commitment::Confirmed,
            funding_keypair: None,
            loader_id: default_loader_id(),
            toolchain_command: vec!["anchor".to_string(), "build".to_string()],
            isolation: IsolationMode::Bubblewrap,
            toolchain_paths: vec![PathBuf::from("/usr")],
            cargo_home: None,
            build_timeout: Duration::from_secs(300),
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            retry: RetryConfig::default(),
            fee_allowance: 10_000,
            artifact_capacity: 64,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            body_limit_bytes: 8 * 1024 * 1024,
            local: false,
        }
    }
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let local = env_bool("SOL_SANDBOX_LOCAL");

        let rpc_url = env_string("SOL_SANDBOX_RPC_URL");
        let network = match (env_string("SOL_SANDBOX_NETWORK"), &rpc_url) {
            (Some(network), _) => network,
            (None, _) if local => LOCAL_NETWORK.to_string(),
            (None, Some(url)) => infer_network(url),
            (None, None) => defaults.network.clone(),
        };
        let rpc_url = rpc_url.unwrap_or_else(|| default_rpc_endpoint(&network));

        let commitment = match env_string("SOL_SANDBOX_COMMITMENT") {
            Some(raw) => raw
                .parse::<Commitment>()
                .map_err(|e| anyhow!("SOL_SANDBOX_COMMITMENT: {e}"))?,
            None => defaults.commitment,
        };

        let loader_id = match env_string("SOL_SANDBOX_LOADER_ID") {
            Some(raw) => raw
                .parse::<Pubkey>()
                .context("SOL_SANDBOX_LOADER_ID is not a valid address")?,
            None => defaults.loader_id,
        };

        let isolation = match env_string("SOL_SANDBOX_ISOLATION") {
            Some(raw) => raw.parse()?,
            None => defaults.isolation,
        };

        let listen_addr = env_string_or("SOL_SANDBOX_LISTEN", &defaults.listen_addr.to_string())
            .parse::<SocketAddr>()
            .context("SOL_SANDBOX_LISTEN is not a socket address")?;

        let toolchain_paths = env_string("SOL_SANDBOX_TOOLCHAIN_PATHS")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or(defaults.toolchain_paths);

        let retry = RetryConfig::new(
            env_var_or("SOL_SANDBOX_RPC_RETRIES", defaults.retry.retries),
            env_var_or(
                "SOL_SANDBOX_RPC_BACKOFF_MS",
                defaults.retry.initial_backoff.as_millis() as u64,
            ),
            env_var_or(
                "SOL_SANDBOX_RPC_MAX_BACKOFF_MS",
                defaults.retry.max_backoff.as_millis() as u64,
            ),
        );

        Ok(Self {
            paths: env_string("SOL_SANDBOX_HOME")
                .map(SandboxPaths::from_base)
                .unwrap_or(defaults.paths),
            rpc_url,
            network,
            commitment,
            funding_keypair: env_string("SOL_SANDBOX_KEYPAIR").map(PathBuf::from),
            loader_id,
            toolchain_command: env_command("SOL_SANDBOX_TOOLCHAIN")
                .unwrap_or(defaults.toolchain_command),
            isolation,
            toolchain_paths,
            cargo_home: env_string("SOL_SANDBOX_CARGO_HOME").map(PathBuf::from),
            build_timeout: Duration::from_secs(env_var_or(
                "SOL_SANDBOX_BUILD_TIMEOUT_SECS",
                defaults.build_timeout.as_secs(),
            )),
            confirm_timeout: Duration::from_secs(env_var_or(
                "SOL_SANDBOX_CONFIRM_TIMEOUT_SECS",
                defaults.confirm_timeout.as_secs(),
            )),
            poll_interval: Duration::from_millis(env_var_or(
                "SOL_SANDBOX_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            retry,
            fee_allowance: env_var_or("SOL_SANDBOX_FEE_ALLOWANCE", defaults.fee_allowance),
            artifact_capacity: env_var("SOL_SANDBOX_ARTIFACT_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.artifact_capacity),
            listen_addr,
            body_limit_bytes: env_var_or("SOL_SANDBOX_BODY_LIMIT", defaults.body_limit_bytes),
            local,
        })
    }

    /// Funding keypair location: explicit path, else the Solana CLI default.
    pub fn funding_keypair_path(&self) -> Option<PathBuf> {
        self.funding_keypair.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(".config").join("solana").join("id.json"))
        })
    }

    /// Base config for tests and embedding: everything under `home`, local
    /// chain, toolchain unconfined.
    pub fn local_at(home: impl Into<PathBuf>) -> Self {
        Self {
            paths: SandboxPaths::from_base(home),
            network: LOCAL_NETWORK.to_string(),
            rpc_url: String::new(),
            isolation: IsolationMode::None,
            local: true,
            ..Self::default()
        }
    }
}

pub fn default_loader_id() -> Pubkey {
    // The constant is a valid 32-byte base58 address.
    DEFAULT_LOADER_ID.parse().unwrap_or_default()
}
