//! The build-and-deploy pipeline as one object.
//!
//! [`Pipeline`] owns every service and hands out no globals: the HTTP API,
//! the tool dispatcher and the CLI each hold one (usually behind an `Arc`).
//! Capabilities that touch the outside world, the toolchain runner and the
//! chain RPC, are injected through [`PipelineServices`] so tests can swap in
//! fakes.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sol_sandbox_types::encoding::try_base64_decode;
use sol_sandbox_types::{Keypair, Pubkey};
use sol_transport::network::explorer_address_url;
use sol_transport::{ChainRpc, JsonRpcClient, LocalChain};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactStore, ArtifactSummary};
use crate::config::SandboxConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{DeploymentExecutor, DeploymentStatus};
use crate::idl::Idl;
use crate::ledger::{DeploymentLedger, DeploymentRecord, RecordStatus};
use crate::metrics::PipelineMetrics;
use crate::orchestrator::{BuildOrchestrator, CompileDiagnostic};
use crate::planner::DeploymentPlanner;
use crate::registry::{AccountOverrides, InvokeResult, ProgramHandle, ProgramRegistry};
use crate::runner::{ProcessRunner, ToolchainRunner};
use crate::submit::TransactionSubmitter;
use crate::workspace::WorkspaceManager;

/// Lamports credited to the generated funding key of a local pipeline.
pub const LOCAL_FUNDING_LAMPORTS: u64 = 1_000_000_000_000;

/// Capabilities injected into a [`Pipeline`].
pub struct PipelineServices {
    pub runner: Arc<dyn ToolchainRunner>,
    pub rpc: Arc<dyn ChainRpc>,
    /// Pays for deployments and invocations.
    pub funder: Option<Arc<Keypair>>,
    pub ledger: Arc<DeploymentLedger>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileReport {
    pub build_id: Uuid,
    pub success: bool,
    pub diagnostics: String,
    pub errors: Vec<CompileDiagnostic>,
    /// Stored artifacts, with the ids a later deploy can reference.
    pub artifacts: Vec<ArtifactSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// Where the program binary comes from: exactly one of the three sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Base64-encoded program binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_buffer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<Uuid>,
    /// Deploy the binary of a stored build; its IDL is loaded too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
    /// IDL JSON, loaded into the registry once the deployment confirms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_descriptor: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub program_id: Pubkey,
    pub signature: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub artifact: ArtifactSummary,
    pub minimum_rent_exempt_balance: u64,
    /// The IDL was registered and the program can be invoked.
    pub loaded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub network: String,
    pub rpc_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_account: Option<Pubkey>,
    pub loaded_programs: usize,
    pub stored_artifacts: usize,
}

pub struct Pipeline {
    orchestrator: BuildOrchestrator,
    artifacts: ArtifactStore,
    planner: DeploymentPlanner,
    executor: DeploymentExecutor,
    registry: ProgramRegistry,
    ledger: Arc<DeploymentLedger>,
    rpc: Arc<dyn ChainRpc>,
    metrics: PipelineMetrics,
    network: String,
}

impl Pipeline {
    pub fn new(config: &SandboxConfig, services: PipelineServices) -> Result<Self> {
        let metrics = PipelineMetrics::new().context("failed to register pipeline metrics")?;
        let PipelineServices {
            runner,
            rpc,
            funder,
            ledger,
        } = services;

        let submitter = Arc::new(TransactionSubmitter::new(
            rpc.clone(),
            config.retry,
            config.commitment,
            config.confirm_timeout,
            config.poll_interval,
            metrics.clone(),
        ));
        let orchestrator = BuildOrchestrator::new(
            WorkspaceManager::new(config.paths.workspaces_dir()),
            runner,
            config.build_timeout,
        );
        let planner = DeploymentPlanner::new(
            rpc.clone(),
            config.retry,
            config.fee_allowance,
            metrics.clone(),
        );
        let executor = DeploymentExecutor::new(
            submitter.clone(),
            ledger.clone(),
            funder.clone(),
            config.loader_id,
            config.network.clone(),
            metrics.clone(),
        );
        let registry = ProgramRegistry::new(ledger.clone(), submitter, funder);

        Ok(Self {
            orchestrator,
            artifacts: ArtifactStore::new(config.artifact_capacity),
            planner,
            executor,
            registry,
            ledger,
            rpc,
            metrics,
            network: config.network.clone(),
        })
    }

    /// Wire real capabilities from `config`: the toolchain process runner,
    /// then either the in-process chain with a freshly funded key (`local`)
    /// or a JSON-RPC client with the configured keypair file.
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let runner: Arc<dyn ToolchainRunner> = Arc::new(ProcessRunner::from_config(config));

        if config.local {
            let chain = Arc::new(LocalChain::new(config.loader_id));
            let funder = Keypair::generate();
            chain.airdrop(&funder.pubkey(), LOCAL_FUNDING_LAMPORTS);
            info!(funder = %funder.pubkey(), "using in-process chain");
            return Self::new(
                config,
                PipelineServices {
                    runner,
                    rpc: chain,
                    funder: Some(Arc::new(funder)),
                    ledger: Arc::new(DeploymentLedger::in_memory()),
                },
            );
        }

        let funder = match config.funding_keypair_path() {
            Some(path) if path.exists() => {
                let keypair = Keypair::read_from_file(&path)
                    .with_context(|| format!("failed to load funding keypair {}", path.display()))?;
                info!(funder = %keypair.pubkey(), path = %path.display(), "funding keypair loaded");
                Some(Arc::new(keypair))
            }
            other => {
                warn!(
                    path = ?other,
                    "no funding keypair found; deploy and invoke will fail"
                );
                None
            }
        };
        let ledger = DeploymentLedger::open(config.paths.ledger_path())
            .context("failed to open deployment ledger")?;
        info!(rpc = %config.rpc_url, network = %config.network, "using cluster RPC");

        Self::new(
            config,
            PipelineServices {
                runner,
                rpc: Arc::new(JsonRpcClient::new(&config.rpc_url, config.commitment)),
                funder,
                ledger: Arc::new(ledger),
            },
        )
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn funding_account(&self) -> Option<Pubkey> {
        self.executor.funding_account()
    }

    /// Compile in a throwaway workspace and keep the artifacts for deploy.
    pub async fn compile(&self, source: &str, program_name: &str) -> PipelineResult<CompileReport> {
        let result = self.orchestrator.compile(source, program_name).await?;
        self.metrics.observe_build(result.success, result.duration_ms);

        let artifacts = result
            .artifacts
            .iter()
            .map(|artifact| {
                let id = self.artifacts.put(result.build_id, artifact.clone());
                artifact.summary(Some(id))
            })
            .collect();

        Ok(CompileReport {
            build_id: result.build_id,
            success: result.success,
            diagnostics: result.diagnostics,
            errors: result.errors,
            artifacts,
            warnings: result.warnings,
            duration_ms: result.duration_ms,
        })
    }

    /// Plan and execute a deployment, then register the IDL when the program
    /// is confirmed live.
    #[instrument(skip_all, fields(program = ?request.program_name))]
    pub async fn deploy(&self, request: DeployRequest) -> PipelineResult<DeployReport> {
        let mut warnings = Vec::new();
        let (artifact, idl) = self.resolve_deploy_inputs(&request, &mut warnings)?;

        let funder = self.executor.funding_account().ok_or_else(|| {
            PipelineError::FatalSigning("no funding keypair is configured".to_string())
        })?;
        let plan = self.planner.plan(&artifact, funder).await?;
        let record = self
            .executor
            .execute(&plan, artifact.bytes(), request.program_name.as_deref())
            .await?;

        let loaded = match (record.status, idl) {
            (RecordStatus::Confirmed, Some(idl)) => {
                self.registry.load(record.program_id, idl)?;
                true
            }
            (RecordStatus::Pending, Some(_)) => {
                warnings.push(
                    "deployment is unconfirmed; load the IDL once status reports it deployed"
                        .to_string(),
                );
                false
            }
            _ => false,
        };

        Ok(DeployReport {
            program_id: record.program_id,
            signature: record.signature.to_string(),
            status: record.status,
            error: record.error.clone(),
            network: self.network.clone(),
            explorer_url: explorer_address_url(&self.network, &record.program_id.to_string()),
            artifact: artifact.summary(None),
            minimum_rent_exempt_balance: plan.minimum_rent_exempt_balance,
            loaded,
            warnings,
        })
    }

    fn resolve_deploy_inputs(
        &self,
        request: &DeployRequest,
        warnings: &mut Vec<String>,
    ) -> PipelineResult<(Artifact, Option<Idl>)> {
        let explicit_idl = request
            .interface_descriptor
            .clone()
            .filter(|v| !v.is_null())
            .map(Idl::from_value)
            .transpose()?;

        let name = request.program_name.as_deref().unwrap_or("program");
        let (artifact, build_id) = match (
            &request.program_buffer,
            request.artifact_id,
            request.build_id,
        ) {
            (Some(buffer), None, None) => {
                let bytes = try_base64_decode(buffer).ok_or_else(|| {
                    PipelineError::InputValidation("programBuffer is not valid base64".to_string())
                })?;
                (Artifact::binary(format!("{name}.so"), bytes), None)
            }
            (None, Some(id), None) => {
                let artifact = self.artifacts.get(&id).ok_or_else(|| {
                    PipelineError::InputValidation(format!("unknown or evicted artifact {id}"))
                })?;
                (artifact, self.artifacts.build_of(&id))
            }
            (None, None, Some(build_id)) => {
                let (_, artifact) = self.artifacts.binary_for(&build_id).ok_or_else(|| {
                    PipelineError::InputValidation(format!(
                        "no stored binary for build {build_id}"
                    ))
                })?;
                (artifact, Some(build_id))
            }
            (None, None, None) => {
                return Err(PipelineError::InputValidation(
                    "one of programBuffer, artifactId or buildId is required".to_string(),
                ))
            }
            _ => {
                return Err(PipelineError::InputValidation(
                    "programBuffer, artifactId and buildId are mutually exclusive".to_string(),
                ))
            }
        };

        let idl = match (explicit_idl, build_id) {
            (Some(idl), _) => Some(idl),
            (None, Some(build_id)) => self.stored_idl(&build_id, warnings),
            (None, None) => None,
        };
        Ok((artifact, idl))
    }

    fn stored_idl(&self, build_id: &Uuid, warnings: &mut Vec<String>) -> Option<Idl> {
        let (_, descriptor) = self.artifacts.descriptor_for(build_id)?;
        match Idl::from_slice(descriptor.bytes()) {
            Ok(idl) => Some(idl),
            Err(e) => {
                warn!(%build_id, error = %e, "stored IDL is unusable");
                warnings.push(format!("stored IDL for build {build_id} was not loaded: {e}"));
                None
            }
        }
    }

    pub async fn status(&self, program_id: &Pubkey) -> PipelineResult<DeploymentStatus> {
        self.executor.get_status(program_id).await
    }

    pub fn load(&self, program_id: Pubkey, interface_descriptor: Value) -> PipelineResult<ProgramHandle> {
        let idl = Idl::from_value(interface_descriptor)?;
        if let Some(address) = idl.address().filter(|a| *a != program_id) {
            warn!(%program_id, idl_address = %address, "IDL address differs from program id");
        }
        self.registry.load(program_id, idl)
    }

    pub async fn invoke(
        &self,
        program_id: &Pubkey,
        method: &str,
        args: &Value,
        accounts: &AccountOverrides,
    ) -> PipelineResult<InvokeResult> {
        self.registry.invoke(program_id, method, args, accounts).await
    }

    pub fn unload(&self, program_id: &Pubkey) -> PipelineResult<ProgramHandle> {
        self.registry.unload(program_id)
    }

    pub fn list_programs(&self) -> Vec<ProgramHandle> {
        self.registry.list()
    }

    pub fn deployments(&self) -> Vec<DeploymentRecord> {
        self.ledger.list()
    }

    pub async fn health(&self) -> HealthReport {
        let rpc_healthy = self.rpc.get_health().await.is_ok();
        let slot = self.rpc.get_slot().await.ok();
        HealthReport {
            network: self.network.clone(),
            rpc_healthy,
            slot,
            funding_account: self.funding_account(),
            loaded_programs: self.registry.list().len(),
            stored_artifacts: self.artifacts.len(),
        }
    }
}

/// Parse a base58 program id from caller input.
pub fn parse_program_id(raw: &str) -> PipelineResult<Pubkey> {
    raw.parse::<Pubkey>()
        .map_err(|e| PipelineError::InputValidation(format!("invalid program id '{raw}': {e}")))
}
