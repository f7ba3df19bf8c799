//! Shared send-and-confirm path for deploy and invoke transactions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sol_sandbox_types::{Hash, Instruction, Keypair, Message, Pubkey, RetryConfig, Signature, Transaction};
use sol_transport::{with_retries_notify, ChainRpc, Commitment, LatestBlockhash, RpcError};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;

/// How a submitted transaction ended, as far as polling could tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Reached the configured commitment without error.
    Confirmed { slot: u64 },
    /// Landed with an execution error.
    Failed(String),
    /// No final answer before `confirm_timeout`.
    TimedOut,
    /// The blockhash expired and the signature never became visible.
    Expired,
}

/// Run an RPC call with the shared retry policy, counting each retry.
pub async fn call_with_retries<T, F, Fut>(
    retry: &RetryConfig,
    metrics: &PipelineMetrics,
    label: &str,
    f: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    with_retries_notify(retry, label, |_, _| metrics.inc_rpc_retry(), f)
        .await
        .map_err(PipelineError::from)
}

pub struct TransactionSubmitter {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryConfig,
    commitment: Commitment,
    confirm_timeout: Duration,
    poll_interval: Duration,
    metrics: PipelineMetrics,
}

impl TransactionSubmitter {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        retry: RetryConfig,
        commitment: Commitment,
        confirm_timeout: Duration,
        poll_interval: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            rpc,
            retry,
            commitment,
            confirm_timeout,
            poll_interval,
            metrics,
        }
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    pub async fn latest_blockhash(&self) -> PipelineResult<LatestBlockhash> {
        call_with_retries(&self.retry, &self.metrics, "getLatestBlockhash", || {
            self.rpc.get_latest_blockhash()
        })
        .await
    }

    /// Compile `instructions` into a transaction paid by `payer` and sign it
    /// with exactly `signers`.
    pub fn sign(
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
        blockhash: Hash,
    ) -> PipelineResult<Transaction> {
        let message = Message::new(instructions, payer, blockhash)?;
        let mut tx = Transaction::new_unsigned(message);
        tx.sign(signers)
            .map_err(|e| PipelineError::FatalSigning(e.to_string()))?;
        Ok(tx)
    }

    /// Send with retries. A retry that finds the transaction already
    /// processed counts as a successful send.
    pub async fn send(&self, tx: &Transaction) -> PipelineResult<Signature> {
        let expected = tx.signature();
        let result = with_retries_notify(
            &self.retry,
            "sendTransaction",
            |_, _| self.metrics.inc_rpc_retry(),
            || self.rpc.send_transaction(tx),
        )
        .await;

        match result {
            Ok(signature) => Ok(signature),
            Err(RpcError::Rejected(message)) if message.contains("already been processed") => {
                debug!(%expected, "transaction already processed");
                Ok(expected)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll the signature until it reaches the configured commitment, fails,
    /// expires, or `confirm_timeout` passes.
    pub async fn confirm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> SubmitOutcome {
        let deadline = Instant::now() + self.confirm_timeout;

        loop {
            match self.rpc.get_signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        return SubmitOutcome::Failed(err);
                    }
                    if status.satisfies(self.commitment) {
                        return SubmitOutcome::Confirmed { slot: status.slot };
                    }
                }
                Ok(None) => {
                    if self.blockhash_expired(last_valid_block_height).await {
                        // One last look: it may have landed just before expiry.
                        match self.rpc.get_signature_status(signature).await {
                            Ok(Some(status)) => match status.err {
                                Some(err) => return SubmitOutcome::Failed(err),
                                None if status.satisfies(self.commitment) => {
                                    return SubmitOutcome::Confirmed { slot: status.slot }
                                }
                                None => {}
                            },
                            _ => return SubmitOutcome::Expired,
                        }
                    }
                }
                Err(e) => {
                    debug!(%signature, error = %e, "signature status poll failed");
                    self.metrics.inc_rpc_retry();
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                warn!(%signature, timeout_secs = self.confirm_timeout.as_secs(), "confirmation timed out");
                return SubmitOutcome::TimedOut;
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn blockhash_expired(&self, last_valid_block_height: u64) -> bool {
        match self.rpc.get_block_height().await {
            Ok(height) => height > last_valid_block_height,
            Err(_) => false,
        }
    }

    /// Blockhash, sign, send, confirm.
    pub async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> PipelineResult<(Signature, SubmitOutcome)> {
        let latest = self.latest_blockhash().await?;
        let tx = Self::sign(instructions, payer, signers, latest.blockhash)?;
        let signature = self.send(&tx).await?;
        let outcome = self
            .confirm(&signature, latest.last_valid_block_height)
            .await;
        info!(%signature, outcome = ?outcome, "transaction submitted");
        Ok((signature, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_loader_id;
    use sol_sandbox_types::instruction::transfer;
    use sol_transport::LocalChain;

    fn submitter(chain: Arc<LocalChain>, retry: RetryConfig) -> (TransactionSubmitter, PipelineMetrics) {
        let metrics = PipelineMetrics::new().unwrap();
        let submitter = TransactionSubmitter::new(
            chain,
            retry,
            Commitment::Confirmed,
            Duration::from_millis(200),
            Duration::from_millis(10),
            metrics.clone(),
        );
        (submitter, metrics)
    }

    fn funded(chain: &LocalChain) -> Keypair {
        let payer = Keypair::generate();
        chain.airdrop(&payer.pubkey(), 1_000_000_000);
        payer
    }

    #[tokio::test]
    async fn confirms_transfer() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = funded(&chain);
        let to = Pubkey::new([5; 32]);
        let (submitter, _) = submitter(chain.clone(), RetryConfig::none());

        let ix = transfer(&payer.pubkey(), &to, 1_000).unwrap();
        let (_, outcome) = submitter
            .send_and_confirm(&[ix], &payer.pubkey(), &[&payer])
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Confirmed { .. }));
        assert_eq!(chain.account(&to).unwrap().lamports, 1_000);
    }

    #[tokio::test]
    async fn retries_transient_send_failures() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = funded(&chain);
        let (submitter, metrics) = submitter(chain.clone(), RetryConfig::new(3, 1, 2));
        chain.fail_next_sends(2);

        let ix = transfer(&payer.pubkey(), &Pubkey::new([6; 32]), 10).unwrap();
        let (_, outcome) = submitter
            .send_and_confirm(&[ix], &payer.pubkey(), &[&payer])
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Confirmed { .. }));
        assert_eq!(metrics.rpc_retries(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_are_transient_network() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = funded(&chain);
        let (submitter, _) = submitter(chain.clone(), RetryConfig::new(1, 1, 1));
        chain.fail_next_sends(5);

        let ix = transfer(&payer.pubkey(), &Pubkey::new([7; 32]), 10).unwrap();
        let err = submitter
            .send_and_confirm(&[ix], &payer.pubkey(), &[&payer])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientNetwork);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = Keypair::generate();
        let (submitter, metrics) = submitter(chain.clone(), RetryConfig::new(5, 1, 1));

        let ix = transfer(&payer.pubkey(), &Pubkey::new([8; 32]), 10).unwrap();
        let err = submitter
            .send_and_confirm(&[ix], &payer.pubkey(), &[&payer])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransactionRejected);
        assert_eq!(metrics.rpc_retries(), 0);
    }

    #[tokio::test]
    async fn withheld_status_times_out() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = funded(&chain);
        let (submitter, _) = submitter(chain.clone(), RetryConfig::none());
        chain.withhold_statuses(true);

        let ix = transfer(&payer.pubkey(), &Pubkey::new([9; 32]), 10).unwrap();
        let (_, outcome) = submitter
            .send_and_confirm(&[ix], &payer.pubkey(), &[&payer])
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn dropped_transaction_expires() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let payer = funded(&chain);
        let (submitter, _) = submitter(chain.clone(), RetryConfig::none());
        chain.drop_next_sends(1);

        let latest = submitter.latest_blockhash().await.unwrap();
        let ix = transfer(&payer.pubkey(), &Pubkey::new([10; 32]), 10).unwrap();
        let tx = TransactionSubmitter::sign(&[ix], &payer.pubkey(), &[&payer], latest.blockhash)
            .unwrap();
        let signature = submitter.send(&tx).await.unwrap();
        chain.advance_blocks(200);

        let outcome = submitter
            .confirm(&signature, latest.last_valid_block_height)
            .await;
        assert_eq!(outcome, SubmitOutcome::Expired);
    }

    #[test]
    fn missing_signer_is_fatal_signing() {
        let payer = Keypair::generate();
        let other = Keypair::generate();
        let ix = transfer(&payer.pubkey(), &Pubkey::new([1; 32]), 1).unwrap();
        let err = TransactionSubmitter::sign(&[ix], &payer.pubkey(), &[&other], Hash::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FatalSigning);
    }
}
