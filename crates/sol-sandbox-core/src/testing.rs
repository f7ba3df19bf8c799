//! Test doubles and fixtures shared by this crate's tests, the server tests
//! and the CLI tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sol_sandbox_types::{Keypair, RetryConfig};
use sol_transport::LocalChain;

use crate::config::SandboxConfig;
use crate::error::HostError;
use crate::ledger::DeploymentLedger;
use crate::pipeline::{Pipeline, PipelineServices, LOCAL_FUNDING_LAMPORTS};
use crate::runner::{ToolchainOutput, ToolchainRunner};
use crate::workspace::lib_name;

pub const SAMPLE_PROGRAM: &str = r#"use anchor_lang::prelude::*;

declare_id!("11111111111111111111111111111111");

#[program]
pub mod counter {
    use super::*;

    pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
        ctx.accounts.counter.count = 0;
        Ok(())
    }

    pub fn increment(ctx: Context<Increment>, amount: u64) -> Result<()> {
        ctx.accounts.counter.count += amount;
        Ok(())
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(init, payer = user, space = 8 + 8)]
    pub counter: Account<'info, Counter>,
    #[account(mut)]
    pub user: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Increment<'info> {
    #[account(mut)]
    pub counter: Account<'info, Counter>,
}

#[account]
pub struct Counter {
    pub count: u64,
}
"#;

/// IDL matching [`SAMPLE_PROGRAM`], in the 0.30 layout.
pub fn sample_idl() -> Value {
    json!({
        "metadata": { "name": "counter", "version": "0.1.0", "spec": "0.1.0" },
        "instructions": [
            {
                "name": "initialize",
                "accounts": [
                    { "name": "counter", "writable": true },
                    { "name": "user", "writable": true, "signer": true },
                    { "name": "system_program", "address": "11111111111111111111111111111111" }
                ],
                "args": []
            },
            {
                "name": "increment",
                "accounts": [
                    { "name": "counter", "writable": true }
                ],
                "args": [
                    { "name": "amount", "type": "u64" }
                ]
            }
        ]
    })
}

/// What the fake toolchain does when run.
#[derive(Debug, Clone)]
pub enum FakeBuild {
    /// Exit 0 and write `target/deploy/<lib>.so` (and the IDL, if given).
    Succeed { binary: Vec<u8>, idl: Option<Value> },
    /// Exit 1 with `stderr`.
    Fail { stderr: String },
    /// Exit 0 without writing anything.
    NoOutput,
    /// Report a timeout.
    TimeOut,
}

/// [`ToolchainRunner`] that never spawns a process.
pub struct FakeRunner {
    build: FakeBuild,
    runs: Mutex<Vec<PathBuf>>,
}

impl FakeRunner {
    pub fn new(build: FakeBuild) -> Self {
        Self {
            build,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Succeeds with a small binary and [`sample_idl`].
    pub fn succeeding() -> Self {
        Self::new(FakeBuild::Succeed {
            binary: sample_binary(),
            idl: Some(sample_idl()),
        })
    }

    pub fn failing(stderr: impl Into<String>) -> Self {
        Self::new(FakeBuild::Fail {
            stderr: stderr.into(),
        })
    }

    /// Workspace directories the runner was invoked in.
    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

/// Deterministic stand-in for an SBF shared object.
pub fn sample_binary() -> Vec<u8> {
    let mut bytes = b"\x7fELF".to_vec();
    bytes.extend((0..252u32).map(|i| (i % 251) as u8));
    bytes
}

fn program_name_in(workspace: &Path) -> Result<String, HostError> {
    let programs = workspace.join("programs");
    let entry = std::fs::read_dir(&programs)
        .map_err(|e| HostError::io(&programs, e))?
        .filter_map(|entry| entry.ok())
        .next()
        .ok_or_else(|| HostError::Other(format!("no program under {}", programs.display())))?;
    Ok(entry.file_name().to_string_lossy().into_owned())
}

#[async_trait]
impl ToolchainRunner for FakeRunner {
    async fn run(&self, workspace: &Path, limit: Duration) -> Result<ToolchainOutput, HostError> {
        self.runs.lock().push(workspace.to_path_buf());

        let output = match &self.build {
            FakeBuild::Succeed { binary, idl } => {
                let lib = lib_name(&program_name_in(workspace)?);
                let deploy_dir = workspace.join("target").join("deploy");
                tokio::fs::create_dir_all(&deploy_dir)
                    .await
                    .map_err(|e| HostError::io(&deploy_dir, e))?;
                let so = deploy_dir.join(format!("{lib}.so"));
                tokio::fs::write(&so, binary)
                    .await
                    .map_err(|e| HostError::io(&so, e))?;

                if let Some(idl) = idl {
                    let idl_dir = workspace.join("target").join("idl");
                    tokio::fs::create_dir_all(&idl_dir)
                        .await
                        .map_err(|e| HostError::io(&idl_dir, e))?;
                    let path = idl_dir.join(format!("{lib}.json"));
                    let body = serde_json::to_vec_pretty(idl)
                        .map_err(|e| HostError::Other(e.to_string()))?;
                    tokio::fs::write(&path, body)
                        .await
                        .map_err(|e| HostError::io(&path, e))?;
                }
                ToolchainOutput {
                    exit_code: Some(0),
                    stdout: format!("Finished release [optimized] target(s)\nwrote {lib}.so"),
                    ..Default::default()
                }
            }
            FakeBuild::Fail { stderr } => ToolchainOutput {
                exit_code: Some(1),
                stderr: stderr.clone(),
                ..Default::default()
            },
            FakeBuild::NoOutput => ToolchainOutput {
                exit_code: Some(0),
                ..Default::default()
            },
            FakeBuild::TimeOut => ToolchainOutput {
                exit_code: None,
                timed_out: true,
                duration: limit,
                ..Default::default()
            },
        };
        Ok(output)
    }
}

/// A pipeline over a [`LocalChain`] with short timeouts, plus the handles
/// tests poke at.
pub struct LocalHarness {
    pub pipeline: Pipeline,
    pub chain: Arc<LocalChain>,
    pub runner: Arc<FakeRunner>,
    pub funder: Arc<Keypair>,
    pub config: SandboxConfig,
}

/// Config rooted at `home` with test-friendly timings.
pub fn test_config(home: &Path) -> SandboxConfig {
    SandboxConfig {
        build_timeout: Duration::from_secs(5),
        confirm_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        retry: RetryConfig::new(3, 1, 5),
        ..SandboxConfig::local_at(home)
    }
}

pub fn local_harness(home: &Path, runner: FakeRunner) -> Result<LocalHarness> {
    local_harness_with(test_config(home), runner)
}

pub fn local_harness_with(config: SandboxConfig, runner: FakeRunner) -> Result<LocalHarness> {
    let chain = Arc::new(LocalChain::new(config.loader_id));
    let funder = Arc::new(Keypair::generate());
    chain.airdrop(&funder.pubkey(), LOCAL_FUNDING_LAMPORTS);
    let runner = Arc::new(runner);

    let pipeline = Pipeline::new(
        &config,
        PipelineServices {
            runner: runner.clone(),
            rpc: chain.clone(),
            funder: Some(funder.clone()),
            ledger: Arc::new(DeploymentLedger::in_memory()),
        },
    )?;
    Ok(LocalHarness {
        pipeline,
        chain,
        runner,
        funder,
        config,
    })
}
