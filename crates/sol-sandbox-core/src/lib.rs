//! Sol Sandbox Core
//!
//! Build-and-deploy pipeline for Anchor programs submitted as source text.
//!
//! Source is compiled in a throwaway workspace, the resulting binary is
//! published with a single atomic transaction, and deployed programs can be
//! invoked through their IDL.
//!
//! # Pipeline stages
//!
//! - [`workspace`]: per-build scratch directories, scaffolded as an Anchor project
//! - [`orchestrator`]: runs the toolchain and collects artifacts and diagnostics
//! - [`artifact`]: artifacts and the bounded in-memory store
//! - [`planner`]: rent and funding checks, fresh program keypair
//! - [`executor`]: the deploy transaction and status reconciliation
//! - [`registry`]: loaded IDLs and method invocation
//!
//! [`pipeline::Pipeline`] ties the stages together; the HTTP API, the tool
//! dispatcher and the CLI all go through it.
//!
//! # Example
//!
//! ```ignore
//! use sol_sandbox_core::{Pipeline, SandboxConfig};
//!
//! let pipeline = Pipeline::from_config(&SandboxConfig::from_env()?)?;
//! let report = pipeline.compile(source, "counter").await?;
//! ```

#![allow(clippy::result_large_err)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod executor;
pub mod idl;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod response;
pub mod runner;
pub mod sandbox;
pub mod submit;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod workspace;

pub use artifact::{Artifact, ArtifactKind, ArtifactStore, ArtifactSummary};
pub use config::{IsolationMode, SandboxConfig};
pub use error::{ErrorKind, HostError, PipelineError, PipelineResult};
pub use executor::{DeploymentExecutor, DeploymentStatus};
pub use idl::Idl;
pub use ledger::{DeploymentLedger, DeploymentRecord, RecordStatus};
pub use metrics::PipelineMetrics;
pub use orchestrator::{BuildOrchestrator, CompilationResult, CompileDiagnostic};
pub use paths::SandboxPaths;
pub use pipeline::{
    parse_program_id, CompileReport, DeployReport, DeployRequest, HealthReport, Pipeline,
    PipelineServices,
};
pub use registry::{AccountOverrides, InvokeResult, ProgramHandle, ProgramRegistry};
pub use response::{extract_input, ToolMeta, ToolResponse};
pub use runner::{ProcessRunner, ToolchainOutput, ToolchainRunner};
pub use workspace::{WorkspaceHandle, WorkspaceManager};
