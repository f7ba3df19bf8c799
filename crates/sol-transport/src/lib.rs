//! Sol Transport Layer
//!
//! Network access for the sandbox pipeline.
//!
//! This crate provides:
//! - [`rpc`]: the [`ChainRpc`] capability and its result types
//! - [`json_rpc`]: JSON-RPC client for a real cluster
//! - [`local`]: an in-process chain for `serve --local` and tests
//! - [`retry`]: retry-with-backoff for transient RPC failures
//! - [`network`]: cluster endpoints and explorer links
//!
//! # Example
//!
//! ```ignore
//! use sol_transport::{ChainRpc, Commitment, JsonRpcClient};
//!
//! let client = JsonRpcClient::new("https://api.devnet.solana.com", Commitment::Confirmed);
//! let slot = client.get_slot().await?;
//! ```

pub mod json_rpc;
pub mod local;
pub mod network;
pub mod retry;
pub mod rpc;

// Re-export main types for convenience
pub use json_rpc::JsonRpcClient;
pub use local::LocalChain;
pub use retry::{with_retries, with_retries_notify};
pub use rpc::{AccountInfo, ChainRpc, Commitment, LatestBlockhash, RpcError, TransactionStatus};
