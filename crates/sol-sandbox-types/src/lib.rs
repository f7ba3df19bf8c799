//! Shared types for the sol-sandbox workspace.
//!
//! This crate provides foundational types used across multiple crates in the workspace,
//! keeping the transport and pipeline crates free of circular dependencies.
//!
//! ## Modules
//!
//! - [`keys`]: pubkeys, keypairs, signatures and hashes
//! - [`tx`]: message and transaction wire format
//! - [`instruction`]: system and loader instruction encodings
//! - [`encoding`]: base64/base58/sha256 helpers
//! - [`env_utils`]: `SOL_SANDBOX_*` environment parsing

pub mod encoding;
pub mod env_utils;
pub mod instruction;
pub mod keys;
pub mod tx;

pub use keys::{Hash, KeyError, Keypair, Pubkey, Signature, SYSTEM_PROGRAM_ID};
pub use tx::{AccountMeta, Instruction, Message, Transaction, WireError};

use std::time::Duration;

/// Configuration for retry behavior on network operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of retry attempts after the first try.
    pub retries: usize,
    /// Initial backoff duration between retries.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Create a new RetryConfig with the specified parameters.
    pub fn new(retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// No retries and no waiting; useful in tests.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Backoff before retry number `attempt` (1-based): doubles from
    /// `initial_backoff` and is capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 8,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(5000),
        }
    }
}
