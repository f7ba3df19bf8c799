//! Deployment execution and status reconciliation.
//!
//! A deployment is one transaction with four instructions:
//!
//! 1. system `CreateAccount` funding the program account with the
//!    rent-exempt minimum for `artifact_size` bytes (owner: system program),
//! 2. system `Assign` handing the account to the loader,
//! 3. loader `Write` copying the bytes in at offset 0,
//! 4. loader `Finalize` marking the account executable.
//!
//! The chain applies all four or none, so a program account either exists
//! complete and executable or not at all.
//!
//! A `Pending` ledger record is written before the transaction is sent. If
//! confirmation cannot be established the record stays `Pending` and
//! [`DeploymentExecutor::get_status`] settles it later from live chain data.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sol_sandbox_types::encoding::sha256_hex;
use sol_sandbox_types::instruction::{assign, create_account, loader_finalize, loader_write};
use sol_sandbox_types::{Keypair, Pubkey, SYSTEM_PROGRAM_ID};
use sol_transport::{AccountInfo, ChainRpc};
use tracing::{info, instrument, warn};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::ledger::{DeploymentLedger, DeploymentRecord, RecordStatus};
use crate::metrics::PipelineMetrics;
use crate::planner::DeploymentPlan;
use crate::submit::{call_with_retries, SubmitOutcome, TransactionSubmitter};

pub const EXPIRED_ERROR: &str = "blockhash expired before the transaction landed";

/// Live view of a program account plus its ledger record, if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub program_id: Pubkey,
    /// Account exists, is executable and is owned by the loader.
    pub deployed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Pubkey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lamports: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DeploymentRecord>,
}

pub struct DeploymentExecutor {
    rpc: Arc<dyn ChainRpc>,
    submitter: Arc<TransactionSubmitter>,
    ledger: Arc<DeploymentLedger>,
    funder: Option<Arc<Keypair>>,
    loader_id: Pubkey,
    network: String,
    metrics: PipelineMetrics,
}

impl DeploymentExecutor {
    pub fn new(
        submitter: Arc<TransactionSubmitter>,
        ledger: Arc<DeploymentLedger>,
        funder: Option<Arc<Keypair>>,
        loader_id: Pubkey,
        network: impl Into<String>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            rpc: submitter.rpc().clone(),
            submitter,
            ledger,
            funder,
            loader_id,
            network: network.into(),
            metrics,
        }
    }

    pub fn funding_account(&self) -> Option<Pubkey> {
        self.funder.as_ref().map(|k| k.pubkey())
    }

    pub fn loader_id(&self) -> Pubkey {
        self.loader_id
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Submit the deployment described by `plan`.
    ///
    /// Returns the ledger record: `Confirmed`, `Failed` when the transaction
    /// landed with an error, or `Pending` when confirmation is still unknown.
    /// A send that keeps failing transiently is reconciled like a
    /// confirmation timeout, since the transaction may have landed anyway.
    #[instrument(skip_all, fields(program_id = %plan.program_id(), size = bytes.len()))]
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        bytes: &[u8],
        program_name: Option<&str>,
    ) -> PipelineResult<DeploymentRecord> {
        let funder = self.funder.as_deref().ok_or_else(|| {
            PipelineError::FatalSigning("no funding keypair is configured".to_string())
        })?;
        if funder.pubkey() != plan.funding_account {
            return Err(PipelineError::FatalSigning(format!(
                "funding keypair {} does not match planned funding account {}",
                funder.pubkey(),
                plan.funding_account
            )));
        }
        if bytes.len() != plan.artifact_size {
            return Err(PipelineError::InputValidation(format!(
                "binary is {} bytes but the plan was built for {}",
                bytes.len(),
                plan.artifact_size
            )));
        }

        let program_id = plan.program_id();
        let instructions = [
            create_account(
                &plan.funding_account,
                &program_id,
                plan.minimum_rent_exempt_balance,
                plan.artifact_size as u64,
                &SYSTEM_PROGRAM_ID,
            )?,
            assign(&program_id, &self.loader_id)?,
            loader_write(&self.loader_id, &program_id, 0, bytes.to_vec())?,
            loader_finalize(&self.loader_id, &program_id)?,
        ];

        let latest = self.submitter.latest_blockhash().await?;
        let tx = TransactionSubmitter::sign(
            &instructions,
            &plan.funding_account,
            &[funder, &plan.program_keypair],
            latest.blockhash,
        )?;

        let record = DeploymentRecord {
            program_id,
            signature: tx.signature(),
            network: self.network.clone(),
            submitted_at: Utc::now(),
            status: RecordStatus::Pending,
            error: None,
            last_valid_block_height: latest.last_valid_block_height,
            program_name: program_name.map(str::to_string),
            artifact_sha256: Some(sha256_hex(bytes)),
            updated_at: None,
        };
        self.ledger.insert(record.clone());

        if let Err(e) = self.submitter.send(&tx).await {
            if e.kind() != ErrorKind::TransientNetwork {
                self.ledger
                    .update_status(&program_id, RecordStatus::Failed, Some(e.to_string()));
                self.metrics.inc_deployment(RecordStatus::Failed.as_str());
                return Err(e);
            }
            // The transaction may have landed before the error; the chain
            // decides, not the send result.
            warn!(error = %e, "send failed after retries, reconciling");
            let settled = match self.reconcile(&record).await {
                Ok(updated) => updated,
                Err(re) => {
                    warn!(error = %re, "reconciliation failed, deployment left pending");
                    record
                }
            };
            self.metrics.inc_deployment(settled.status.as_str());
            info!(
                signature = %settled.signature,
                status = settled.status.as_str(),
                "deployment reconciled after send error"
            );
            return Ok(settled);
        }

        let outcome = self
            .submitter
            .confirm(&record.signature, record.last_valid_block_height)
            .await;
        let settled = match outcome {
            SubmitOutcome::Confirmed { .. } => self
                .ledger
                .update_status(&program_id, RecordStatus::Confirmed, None),
            SubmitOutcome::Failed(err) => {
                self.ledger
                    .update_status(&program_id, RecordStatus::Failed, Some(err))
            }
            SubmitOutcome::TimedOut | SubmitOutcome::Expired => {
                match self.reconcile(&record).await {
                    Ok(updated) => Some(updated),
                    Err(e) => {
                        warn!(error = %e, "reconciliation failed, deployment left pending");
                        None
                    }
                }
            }
        };
        let settled = settled.unwrap_or(record);

        self.metrics.inc_deployment(settled.status.as_str());
        info!(
            signature = %settled.signature,
            status = settled.status.as_str(),
            "deployment submitted"
        );
        Ok(settled)
    }

    /// Live account data for `program_id`, settling a pending ledger record
    /// when the chain now shows its outcome. Sends nothing.
    pub async fn get_status(&self, program_id: &Pubkey) -> PipelineResult<DeploymentStatus> {
        let mut record = self.ledger.get(program_id);
        if let Some(pending) = record.as_ref().filter(|r| r.status == RecordStatus::Pending) {
            match self.reconcile(pending).await {
                Ok(updated) => record = Some(updated),
                Err(e) => warn!(%program_id, error = %e, "reconciliation failed"),
            }
        }

        let account = self.account(program_id).await?;
        Ok(DeploymentStatus {
            program_id: *program_id,
            deployed: account
                .as_ref()
                .map(|a| self.is_deployed(a))
                .unwrap_or(false),
            owner: account.as_ref().map(|a| a.owner),
            executable: account.as_ref().map(|a| a.executable),
            lamports: account.as_ref().map(|a| a.lamports),
            data_length: account.as_ref().map(|a| a.data.len()),
            record,
        })
    }

    /// Settle a `Pending` record from the chain:
    /// a deployed account means `Confirmed`; an errored signature means
    /// `Failed`; no account after the blockhash expired means `Failed`.
    /// Anything else stays `Pending`.
    pub async fn reconcile(&self, record: &DeploymentRecord) -> PipelineResult<DeploymentRecord> {
        if record.status.is_terminal() {
            return Ok(record.clone());
        }
        let program_id = record.program_id;

        let account = self.account(&program_id).await?;
        if account.as_ref().is_some_and(|a| self.is_deployed(a)) {
            info!(%program_id, "reconciled: program account is live");
            return Ok(self.settle(record, RecordStatus::Confirmed, None));
        }

        let status = call_with_retries(
            self.submitter.retry(),
            &self.metrics,
            "getSignatureStatuses",
            || self.rpc.get_signature_status(&record.signature),
        )
        .await?;
        if let Some(err) = status.and_then(|s| s.err) {
            info!(%program_id, error = %err, "reconciled: transaction failed");
            return Ok(self.settle(record, RecordStatus::Failed, Some(err)));
        }

        let height = call_with_retries(
            self.submitter.retry(),
            &self.metrics,
            "getBlockHeight",
            || self.rpc.get_block_height(),
        )
        .await?;
        if account.is_none() && height > record.last_valid_block_height {
            info!(%program_id, "reconciled: blockhash expired");
            return Ok(self.settle(
                record,
                RecordStatus::Failed,
                Some(EXPIRED_ERROR.to_string()),
            ));
        }

        Ok(self.ledger.get(&program_id).unwrap_or_else(|| record.clone()))
    }

    fn settle(
        &self,
        record: &DeploymentRecord,
        status: RecordStatus,
        error: Option<String>,
    ) -> DeploymentRecord {
        self.ledger
            .update_status(&record.program_id, status, error)
            .unwrap_or_else(|| record.clone())
    }

    async fn account(&self, program_id: &Pubkey) -> PipelineResult<Option<AccountInfo>> {
        call_with_retries(
            self.submitter.retry(),
            &self.metrics,
            "getAccountInfo",
            || self.rpc.get_account_info(program_id),
        )
        .await
    }

    fn is_deployed(&self, account: &AccountInfo) -> bool {
        account.executable && account.owner == self.loader_id
    }
}
