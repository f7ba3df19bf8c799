//! Loaded programs and method invocation against their IDL.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sol_sandbox_types::{AccountMeta, Instruction, Keypair, Pubkey, Signature, SYSTEM_PROGRAM_ID};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::idl::{Idl, IdlAccountItem};
use crate::ledger::{DeploymentLedger, RecordStatus};
use crate::submit::{SubmitOutcome, TransactionSubmitter};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramHandle {
    pub program_id: Pubkey,
    pub interface_descriptor: Arc<Idl>,
    pub loaded_at: DateTime<Utc>,
}

impl ProgramHandle {
    pub fn methods(&self) -> Vec<String> {
        self.interface_descriptor.method_names()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub signature: Signature,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Explicit account addresses for an invocation, keyed by IDL account name.
pub type AccountOverrides = HashMap<String, Pubkey>;

pub struct ProgramRegistry {
    handles: Mutex<HashMap<Pubkey, ProgramHandle>>,
    ledger: Arc<DeploymentLedger>,
    submitter: Arc<TransactionSubmitter>,
    payer: Option<Arc<Keypair>>,
}

impl ProgramRegistry {
    pub fn new(
        ledger: Arc<DeploymentLedger>,
        submitter: Arc<TransactionSubmitter>,
        payer: Option<Arc<Keypair>>,
    ) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            ledger,
            submitter,
            payer,
        }
    }

    /// Register (or replace) the IDL for `program_id`.
    ///
    /// Refused while the program's deployment is still pending.
    pub fn load(&self, program_id: Pubkey, idl: Idl) -> PipelineResult<ProgramHandle> {
        if self.ledger.is_pending(&program_id) {
            return Err(PipelineError::DeploymentPending(program_id));
        }
        let handle = ProgramHandle {
            program_id,
            interface_descriptor: Arc::new(idl),
            loaded_at: Utc::now(),
        };
        let replaced = self
            .handles
            .lock()
            .insert(program_id, handle.clone())
            .is_some();
        info!(%program_id, replaced, methods = handle.methods().len(), "program loaded");
        Ok(handle)
    }

    pub fn unload(&self, program_id: &Pubkey) -> PipelineResult<ProgramHandle> {
        let handle = self
            .handles
            .lock()
            .remove(program_id)
            .ok_or(PipelineError::NotLoaded(*program_id))?;
        info!(%program_id, "program unloaded");
        Ok(handle)
    }

    pub fn get(&self, program_id: &Pubkey) -> Option<ProgramHandle> {
        self.handles.lock().get(program_id).cloned()
    }

    /// Loaded programs, oldest first.
    pub fn list(&self) -> Vec<ProgramHandle> {
        let mut handles: Vec<_> = self.handles.lock().values().cloned().collect();
        handles.sort_by_key(|h| h.loaded_at);
        handles
    }

    /// Build, sign and submit a call to `method` on a loaded program.
    #[instrument(skip(self, args, accounts), fields(program_id = %program_id))]
    pub async fn invoke(
        &self,
        program_id: &Pubkey,
        method: &str,
        args: &Value,
        accounts: &AccountOverrides,
    ) -> PipelineResult<InvokeResult> {
        // Clone the handle out so the lock is released before any await.
        let handle = self
            .get(program_id)
            .ok_or(PipelineError::NotLoaded(*program_id))?;
        let idl = handle.interface_descriptor.clone();
        let ix = idl
            .instruction(method)
            .ok_or_else(|| PipelineError::UnknownMethod {
                program: *program_id,
                method: method.to_string(),
                available: idl.method_names(),
            })?;

        let data = idl.encode_call(ix, args)?;
        let payer = self.payer.as_deref().ok_or_else(|| {
            PipelineError::FatalSigning("no payer keypair is configured".to_string())
        })?;

        let metas = ix
            .flat_accounts()
            .into_iter()
            .map(|item| resolve_account(item, &ix.name, program_id, &payer.pubkey(), accounts))
            .collect::<PipelineResult<Vec<_>>>()?;
        debug!(method = %ix.name, accounts = metas.len(), data_len = data.len(), "invocation built");

        let instruction = Instruction {
            program_id: *program_id,
            accounts: metas,
            data,
        };
        let (signature, outcome) = self
            .submitter
            .send_and_confirm(&[instruction], &payer.pubkey(), &[payer])
            .await?;

        let (status, error) = match outcome {
            SubmitOutcome::Confirmed { .. } => (RecordStatus::Confirmed, None),
            SubmitOutcome::Failed(err) => (RecordStatus::Failed, Some(err)),
            SubmitOutcome::Expired => (
                RecordStatus::Failed,
                Some(crate::executor::EXPIRED_ERROR.to_string()),
            ),
            SubmitOutcome::TimedOut => (RecordStatus::Pending, None),
        };
        info!(%signature, method = %ix.name, status = status.as_str(), "program invoked");
        Ok(InvokeResult {
            signature,
            status,
            error,
        })
    }
}

/// Account resolution order: explicit override, fixed IDL address, payer
/// for signers, the system program, the program id for optional accounts.
fn resolve_account(
    item: &IdlAccountItem,
    method: &str,
    program_id: &Pubkey,
    payer: &Pubkey,
    overrides: &AccountOverrides,
) -> PipelineResult<AccountMeta> {
    let explicit = overrides
        .get(&item.name)
        .or_else(|| overrides.get(&crate::idl::to_snake_case(&item.name)))
        .copied();
    let fixed = item.address.as_deref().and_then(|a| a.parse::<Pubkey>().ok());

    let pubkey = explicit
        .or(fixed)
        .or_else(|| item.signer.then_some(*payer))
        .or_else(|| is_system_program(&item.name).then_some(SYSTEM_PROGRAM_ID))
        .or_else(|| item.optional.then_some(*program_id))
        .ok_or_else(|| PipelineError::MissingAccount {
            method: method.to_string(),
            account: item.name.clone(),
        })?;

    if item.signer && pubkey != *payer {
        return Err(PipelineError::FatalSigning(format!(
            "account '{}' must sign but only the payer key {} is available",
            item.name, payer
        )));
    }
    Ok(AccountMeta {
        pubkey,
        is_signer: item.signer,
        is_writable: item.writable,
    })
}

fn is_system_program(name: &str) -> bool {
    matches!(name, "system_program" | "systemProgram")
}
