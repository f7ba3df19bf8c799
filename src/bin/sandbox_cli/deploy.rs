//! Deploy command - publish a program binary, or compile and publish source

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sol_sandbox_core::{DeployReport, DeployRequest, Pipeline, PipelineError};
use sol_sandbox_types::encoding::base64_encode;

use super::output::{format_compile_report, format_deploy_report};

#[derive(Parser, Debug)]
pub struct DeployCmd {
    /// Compiled program binary (`.so`)
    #[arg(long, conflicts_with = "source", required_unless_present = "source")]
    pub binary: Option<PathBuf>,

    /// Program source to compile first; its IDL is loaded after deploy
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Program name (required with --source)
    #[arg(long, short)]
    pub name: Option<String>,

    /// IDL JSON to load once the deployment confirms
    #[arg(long)]
    pub idl: Option<PathBuf>,
}

impl DeployCmd {
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let report = self.deploy(pipeline, json_output).await?;
        println!("{}", format_deploy_report(&report, json_output));
        match report.error {
            Some(error) => Err(PipelineError::TransactionRejected(error).into()),
            None => Ok(()),
        }
    }

    async fn deploy(&self, pipeline: &Pipeline, json_output: bool) -> Result<DeployReport> {
        let interface_descriptor = match &self.idl {
            Some(path) => {
                let raw = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Some(serde_json::from_slice(&raw).context("IDL file is not valid JSON")?)
            }
            None => None,
        };

        let mut request = DeployRequest {
            program_name: self.name.clone(),
            interface_descriptor,
            ..Default::default()
        };

        match (&self.binary, &self.source) {
            (Some(binary), _) => {
                let bytes = std::fs::read(binary)
                    .with_context(|| format!("failed to read {}", binary.display()))?;
                request.program_buffer = Some(base64_encode(&bytes));
            }
            (None, Some(source_path)) => {
                let name = self
                    .name
                    .as_deref()
                    .ok_or_else(|| anyhow!("--name is required with --source"))?;
                let source = std::fs::read_to_string(source_path)
                    .with_context(|| format!("failed to read {}", source_path.display()))?;
                let compiled = pipeline.compile(&source, name).await?;
                if !compiled.success {
                    println!("{}", format_compile_report(&compiled, json_output));
                    return Err(PipelineError::Compile(format!(
                        "build {} failed",
                        compiled.build_id
                    ))
                    .into());
                }
                request.build_id = Some(compiled.build_id);
            }
            (None, None) => return Err(anyhow!("one of --binary or --source is required")),
        }

        Ok(pipeline.deploy(request).await?)
    }
}
