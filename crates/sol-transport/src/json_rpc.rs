//! JSON-RPC client over HTTP.
//!
//! Requests go through a blocking `ureq` agent on tokio's blocking pool so
//! RPC waits never stall the async workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sol_sandbox_types::encoding::{base64_encode, try_base64_decode};
use sol_sandbox_types::env_utils::env_var_or;
use sol_sandbox_types::{Pubkey, Signature, Transaction};
use tracing::trace;

use crate::rpc::{AccountInfo, ChainRpc, Commitment, LatestBlockhash, RpcError, TransactionStatus};

/// Error codes returned by `sendTransaction` when preflight rejects the
/// transaction (simulation failure, signature failure, blockhash not found).
const REJECTED_SEND_CODES: &[i64] = &[-32002, -32003];

/// JSON-RPC client for a cluster endpoint.
#[derive(Clone)]
pub struct JsonRpcClient {
    endpoint: String,
    agent: ureq::Agent,
    commitment: Commitment,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn default_timeouts() -> (Duration, Duration) {
        let timeout_secs = env_var_or("SOL_SANDBOX_RPC_TIMEOUT_SECS", Self::DEFAULT_TIMEOUT_SECS);
        let connect_secs = env_var_or(
            "SOL_SANDBOX_RPC_CONNECT_TIMEOUT_SECS",
            Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        );
        (
            Duration::from_secs(timeout_secs),
            Duration::from_secs(connect_secs),
        )
    }

    fn build_agent(timeout: Duration, connect_timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .build()
    }

    /// Create a client with a custom endpoint.
    pub fn new(endpoint: &str, commitment: Commitment) -> Self {
        let (timeout, connect_timeout) = Self::default_timeouts();
        Self::with_timeouts(endpoint, commitment, timeout, connect_timeout)
    }

    /// Create a client with explicit timeouts.
    pub fn with_timeouts(
        endpoint: &str,
        commitment: Commitment,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            agent: Self::build_agent(timeout, connect_timeout),
            commitment,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn call_blocking(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "rpc request");

        let response: Value = match self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_json(&body)
        {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| RpcError::Parse(format!("{method}: {e}")))?,
            Err(ureq::Error::Status(status, resp)) => {
                let message = resp.into_string().unwrap_or_default();
                return Err(RpcError::Http { status, message });
            }
            Err(ureq::Error::Transport(t)) => {
                let message = t.to_string();
                if message.to_ascii_lowercase().contains("timed out") {
                    return Err(RpcError::Timeout);
                }
                return Err(RpcError::Transport(message));
            }
        };

        if let Some(err) = response.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Parse(format!("{method}: response has no result")))
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.call_blocking(method, params))
            .await
            .map_err(|e| RpcError::Transport(format!("rpc task failed: {e}")))?
    }

    fn commitment_config(&self) -> Value {
        json!({ "commitment": self.commitment.as_str() })
    }
}

fn as_u64(value: &Value, what: &str) -> Result<u64, RpcError> {
    value
        .as_u64()
        .ok_or_else(|| RpcError::Parse(format!("{what}: expected integer, got {value}")))
}

/// Unwrap the `{context, value}` envelope used by most read methods.
fn context_value(value: &Value) -> &Value {
    value.get("value").unwrap_or(&Value::Null)
}

fn parse_account(value: &Value) -> Result<Option<AccountInfo>, RpcError> {
    if value.is_null() {
        return Ok(None);
    }
    let lamports = as_u64(&value["lamports"], "account lamports")?;
    let owner: Pubkey = value["owner"]
        .as_str()
        .ok_or_else(|| RpcError::Parse("account owner missing".into()))?
        .parse()
        .map_err(|e| RpcError::Parse(format!("account owner: {e}")))?;
    let data = value["data"]
        .get(0)
        .and_then(Value::as_str)
        .and_then(try_base64_decode)
        .ok_or_else(|| RpcError::Parse("account data is not base64".into()))?;
    let executable = value["executable"].as_bool().unwrap_or(false);
    Ok(Some(AccountInfo {
        lamports,
        owner,
        data,
        executable,
    }))
}

fn parse_status(value: &Value) -> Result<Option<TransactionStatus>, RpcError> {
    if value.is_null() {
        return Ok(None);
    }
    let slot = as_u64(&value["slot"], "status slot")?;
    let err = match &value["err"] {
        Value::Null => None,
        other => Some(other.to_string()),
    };
    let confirmation_status = value["confirmationStatus"]
        .as_str()
        .and_then(|s| s.parse().ok());
    Ok(Some(TransactionStatus {
        slot,
        err,
        confirmation_status,
    }))
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RpcError> {
        let result = self
            .call("getMinimumBalanceForRentExemption", json!([data_len]))
            .await?;
        as_u64(&result, "rent exemption")
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        let result = self
            .call(
                "getBalance",
                json!([pubkey.to_string(), self.commitment_config()]),
            )
            .await?;
        as_u64(context_value(&result), "balance")
    }

    async fn get_account_info(&self, pubkey: &Pubkey) -> Result<Option<AccountInfo>, RpcError> {
        let result = self
            .call(
                "getAccountInfo",
                json!([
                    pubkey.to_string(),
                    { "encoding": "base64", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        parse_account(context_value(&result))
    }

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
        let result = self
            .call("getLatestBlockhash", json!([self.commitment_config()]))
            .await?;
        let value = context_value(&result);
        let blockhash = value["blockhash"]
            .as_str()
            .ok_or_else(|| RpcError::Parse("blockhash missing".into()))?
            .parse()
            .map_err(|e| RpcError::Parse(format!("blockhash: {e}")))?;
        let last_valid_block_height =
            as_u64(&value["lastValidBlockHeight"], "lastValidBlockHeight")?;
        Ok(LatestBlockhash {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_block_height(&self) -> Result<u64, RpcError> {
        let result = self
            .call("getBlockHeight", json!([self.commitment_config()]))
            .await?;
        as_u64(&result, "block height")
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, RpcError> {
        let encoded = base64_encode(&tx.serialize());
        let result = self
            .call(
                "sendTransaction",
                json!([
                    encoded,
                    {
                        "encoding": "base64",
                        "skipPreflight": false,
                        "preflightCommitment": self.commitment.as_str(),
                    }
                ]),
            )
            .await
            .map_err(|e| match e {
                RpcError::Rpc { code, message } if REJECTED_SEND_CODES.contains(&code) => {
                    RpcError::Rejected(message)
                }
                other => other,
            })?;
        result
            .as_str()
            .ok_or_else(|| RpcError::Parse("sendTransaction returned no signature".into()))?
            .parse()
            .map_err(|e| RpcError::Parse(format!("signature: {e}")))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionStatus>, RpcError> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature.to_string()], { "searchTransactionHistory": true }]),
            )
            .await?;
        parse_status(context_value(&result).get(0).unwrap_or(&Value::Null))
    }

    async fn get_health(&self) -> Result<(), RpcError> {
        let result = self.call("getHealth", json!([])).await?;
        match result.as_str() {
            Some("ok") => Ok(()),
            _ => Err(RpcError::Rpc {
                code: -32005,
                message: format!("node unhealthy: {result}"),
            }),
        }
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        let result = self
            .call("getSlot", json!([self.commitment_config()]))
            .await?;
        as_u64(&result, "slot")
    }
}
