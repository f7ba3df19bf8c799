//! Pipeline error taxonomy.
//!
//! Every failure carries a stable [`ErrorKind`] plus a human-readable
//! message. Compile failures are not errors at this level: they come back as
//! a [`CompilationResult`](crate::orchestrator::CompilationResult) with
//! `success == false`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sol_sandbox_types::{Pubkey, WireError};
use sol_transport::RpcError;
use thiserror::Error;

/// Stable error kind reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    Compile,
    Funding,
    TransientNetwork,
    TransactionRejected,
    FatalSigning,
    Host,
    NotLoaded,
    UnknownMethod,
    MissingAccount,
    DeploymentPending,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputValidation => "input_validation",
            Self::Compile => "compile",
            Self::Funding => "funding",
            Self::TransientNetwork => "transient_network",
            Self::TransactionRejected => "transaction_rejected",
            Self::FatalSigning => "fatal_signing",
            Self::Host => "host",
            Self::NotLoaded => "not_loaded",
            Self::UnknownMethod => "unknown_method",
            Self::MissingAccount => "missing_account",
            Self::DeploymentPending => "deployment_pending",
        }
    }

    /// Whether the caller caused the failure (bad request, unknown program).
    pub const fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::InputValidation
                | Self::Compile
                | Self::Funding
                | Self::NotLoaded
                | Self::UnknownMethod
                | Self::MissingAccount
                | Self::DeploymentPending
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-level failures: the sandbox machine itself misbehaved.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("workspace I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn toolchain '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The isolation wrapper itself could not be started.
    #[error("build sandbox unavailable: {0}")]
    Sandbox(String),

    #[error("{0}")]
    Other(String),
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("insufficient funds: {required} lamports required, {available} available")]
    Funding { required: u64, available: u64 },

    #[error("network error after retries: {0}")]
    TransientNetwork(String),

    #[error("transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("signing failed: {0}")]
    FatalSigning(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("program {0} is not loaded")]
    NotLoaded(Pubkey),

    #[error("program {program} has no method '{method}' (available: {})", available.join(", "))]
    UnknownMethod {
        program: Pubkey,
        method: String,
        available: Vec<String>,
    },

    #[error("method '{method}' needs account '{account}' which was not supplied")]
    MissingAccount { method: String, account: String },

    #[error("deployment of {0} has not reached a terminal status")]
    DeploymentPending(Pubkey),
}

impl PipelineError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InputValidation(_) => ErrorKind::InputValidation,
            Self::Compile(_) => ErrorKind::Compile,
            Self::Funding { .. } => ErrorKind::Funding,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::TransactionRejected(_) => ErrorKind::TransactionRejected,
            Self::FatalSigning(_) => ErrorKind::FatalSigning,
            Self::Host(_) => ErrorKind::Host,
            Self::NotLoaded(_) => ErrorKind::NotLoaded,
            Self::UnknownMethod { .. } => ErrorKind::UnknownMethod,
            Self::MissingAccount { .. } => ErrorKind::MissingAccount,
            Self::DeploymentPending(_) => ErrorKind::DeploymentPending,
        }
    }
}

impl From<RpcError> for PipelineError {
    fn from(e: RpcError) -> Self {
        if e.is_transient() {
            Self::TransientNetwork(e.to_string())
        } else {
            Self::TransactionRejected(e.to_string())
        }
    }
}

impl From<WireError> for PipelineError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::MissingSigner(_)
            | WireError::UnexpectedSigner(_)
            | WireError::SignatureCount { .. }
            | WireError::InvalidSignature(_) => Self::FatalSigning(e.to_string()),
            other => Self::InputValidation(other.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_split_by_transience() {
        let transient: PipelineError = RpcError::Timeout.into();
        assert_eq!(transient.kind(), ErrorKind::TransientNetwork);

        let fatal: PipelineError = RpcError::Rejected("bad".into()).into();
        assert_eq!(fatal.kind(), ErrorKind::TransactionRejected);
    }

    #[test]
    fn signer_wire_errors_are_fatal_signing() {
        let err: PipelineError = WireError::MissingSigner(Pubkey::new([1; 32])).into();
        assert_eq!(err.kind(), ErrorKind::FatalSigning);
        let err: PipelineError = WireError::TooManyAccounts(300).into();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::DeploymentPending).unwrap(),
            "\"deployment_pending\""
        );
        assert!(ErrorKind::Funding.is_caller_fault());
        assert!(!ErrorKind::Host.is_caller_fault());
    }

    #[test]
    fn funding_message_names_amounts() {
        let err = PipelineError::Funding {
            required: 8_017_920,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: 8017920 lamports required, 10 available"
        );
    }
}
