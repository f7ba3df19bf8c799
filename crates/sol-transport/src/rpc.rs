//! The chain RPC capability consumed by the deployment pipeline.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sol_sandbox_types::{Hash, Pubkey, Signature, Transaction};
use thiserror::Error;

/// Errors from a chain RPC call.
///
/// [`RpcError::is_transient`] separates failures worth retrying (connection
/// problems, rate limits, unhealthy nodes) from ones that will fail the same
/// way again (rejected transactions, malformed responses).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("failed to parse RPC response: {0}")]
    Parse(String),
}

/// JSON-RPC server error codes that indicate a node-side condition which
/// clears on its own (node behind, slot skipped, block not yet available).
const TRANSIENT_RPC_CODES: &[i64] = &[-32004, -32005, -32007, -32014, -32016];

impl RpcError {
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::Timeout => true,
            RpcError::Http { status, .. } => *status == 429 || *status >= 500,
            RpcError::Rpc { code, .. } => TRANSIENT_RPC_CODES.contains(code),
            RpcError::Rejected(_) | RpcError::Parse(_) => false,
        }
    }
}

/// Commitment level for reads and confirmation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!(
                "unknown commitment '{other}' (expected processed, confirmed or finalized)"
            )),
        }
    }
}

/// Account state as returned by `getAccountInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
    pub executable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    /// Transactions using `blockhash` are rejected once the chain passes
    /// this block height.
    pub last_valid_block_height: u64,
}

/// Status of a submitted transaction (`getSignatureStatuses`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub slot: u64,
    /// Execution error, if the transaction landed but failed.
    pub err: Option<String>,
    pub confirmation_status: Option<Commitment>,
}

impl TransactionStatus {
    /// Whether the status has reached `commitment`.
    pub fn satisfies(&self, commitment: Commitment) -> bool {
        self.confirmation_status
            .map(|c| c >= commitment)
            .unwrap_or(false)
    }
}

/// Network RPC client capability.
///
/// Every call is a suspension point; implementations must not block the
/// async runtime.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize)
        -> Result<u64, RpcError>;

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError>;

    async fn get_account_info(&self, pubkey: &Pubkey) -> Result<Option<AccountInfo>, RpcError>;

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError>;

    async fn get_block_height(&self) -> Result<u64, RpcError>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, RpcError>;

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionStatus>, RpcError>;

    async fn get_health(&self) -> Result<(), RpcError>;

    async fn get_slot(&self) -> Result<u64, RpcError>;
}
