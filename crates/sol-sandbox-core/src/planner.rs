use std::sync::Arc;

use sol_sandbox_types::{Keypair, Pubkey, RetryConfig};
use sol_transport::ChainRpc;
use tracing::{info, instrument};

use crate::artifact::Artifact;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::submit::call_with_retries;

/// Everything the executor needs for one deployment. Built fresh per call:
/// rent is fetched live and the program keypair is never reused.
#[derive(Debug)]
pub struct DeploymentPlan {
    pub artifact_size: usize,
    pub minimum_rent_exempt_balance: u64,
    pub funding_account: Pubkey,
    pub program_keypair: Keypair,
}

impl DeploymentPlan {
    pub fn program_id(&self) -> Pubkey {
        self.program_keypair.pubkey()
    }
}

pub struct DeploymentPlanner {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryConfig,
    fee_allowance: u64,
    metrics: PipelineMetrics,
}

impl DeploymentPlanner {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        retry: RetryConfig,
        fee_allowance: u64,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            rpc,
            retry,
            fee_allowance,
            metrics,
        }
    }

    #[instrument(skip(self, artifact), fields(artifact = artifact.name(), size = artifact.size()))]
    pub async fn plan(
        &self,
        artifact: &Artifact,
        funding_account: Pubkey,
    ) -> PipelineResult<DeploymentPlan> {
        if !artifact.is_binary() {
            return Err(PipelineError::InputValidation(format!(
                "artifact '{}' is not a program binary",
                artifact.name()
            )));
        }
        if artifact.size() == 0 {
            return Err(PipelineError::InputValidation(
                "program binary is empty".to_string(),
            ));
        }

        let size = artifact.size();
        let rent = call_with_retries(&self.retry, &self.metrics, "getMinimumBalanceForRentExemption", || {
            self.rpc.get_minimum_balance_for_rent_exemption(size)
        })
        .await?;
        let balance = call_with_retries(&self.retry, &self.metrics, "getBalance", || {
            self.rpc.get_balance(&funding_account)
        })
        .await?;

        let required = rent.saturating_add(self.fee_allowance);
        if balance < required {
            return Err(PipelineError::Funding {
                required,
                available: balance,
            });
        }

        let program_keypair = Keypair::generate();
        info!(
            program_id = %program_keypair.pubkey(),
            rent,
            balance,
            "deployment planned"
        );
        Ok(DeploymentPlan {
            artifact_size: size,
            minimum_rent_exempt_balance: rent,
            funding_account,
            program_keypair,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::config::default_loader_id;
    use crate::error::ErrorKind;
    use sol_transport::local::rent_exempt_minimum;
    use sol_transport::LocalChain;

    fn planner(chain: Arc<LocalChain>) -> DeploymentPlanner {
        DeploymentPlanner::new(
            chain,
            RetryConfig::new(3, 1, 1),
            10_000,
            PipelineMetrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn plans_with_live_rent_and_fresh_keys() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let funder = Pubkey::new([1; 32]);
        chain.airdrop(&funder, 1_000_000_000);
        let planner = planner(chain.clone());
        let artifact = Artifact::binary("prog", vec![0u8; 1024]);

        let a = planner.plan(&artifact, funder).await.unwrap();
        let b = planner.plan(&artifact, funder).await.unwrap();
        assert_eq!(a.artifact_size, 1024);
        assert_eq!(a.minimum_rent_exempt_balance, rent_exempt_minimum(1024));
        assert_ne!(a.program_id(), b.program_id());
    }

    #[tokio::test]
    async fn insufficient_balance_is_funding_error() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let funder = Pubkey::new([2; 32]);
        chain.airdrop(&funder, 50);
        let planner = planner(chain);

        let err = planner
            .plan(&Artifact::binary("prog", vec![1u8; 64]), funder)
            .await
            .unwrap_err();
        match err {
            PipelineError::Funding {
                required,
                available,
            } => {
                assert_eq!(required, rent_exempt_minimum(64) + 10_000);
                assert_eq!(available, 50);
            }
            other => panic!("expected funding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_descriptors_and_empty_binaries() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let planner = planner(chain);
        let idl = Artifact::new("idl", ArtifactKind::InterfaceDescriptor, b"{}".to_vec());
        let err = planner.plan(&idl, Pubkey::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);

        let empty = Artifact::binary("prog", Vec::<u8>::new());
        let err = planner.plan(&empty, Pubkey::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[tokio::test]
    async fn transient_reads_are_retried() {
        let chain = Arc::new(LocalChain::new(default_loader_id()));
        let funder = Pubkey::new([3; 32]);
        chain.airdrop(&funder, 1_000_000_000);
        chain.fail_next_reads(2);
        let plan = planner(chain).plan(&Artifact::binary("p", vec![1u8; 8]), funder).await;
        assert!(plan.is_ok());
    }
}
