//! Compile command - build an Anchor program from a single source file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sol_sandbox_core::{CompileReport, Pipeline, PipelineError};

use super::output::format_compile_report;

#[derive(Parser, Debug)]
pub struct CompileCmd {
    /// Program source file (the contents of `src/lib.rs`)
    pub source: PathBuf,

    /// Program name (lowercase, digits, `_` or `-`)
    #[arg(long, short)]
    pub name: String,

    /// Write the binary and IDL to this directory
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

impl CompileCmd {
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let report = self.compile(pipeline).await?;
        println!("{}", format_compile_report(&report, json_output));

        if !report.success {
            let message = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::Compile(message).into());
        }
        if let Some(dir) = &self.out_dir {
            write_artifacts(pipeline, &report, dir)?;
        }
        Ok(())
    }

    pub async fn compile(&self, pipeline: &Pipeline) -> Result<CompileReport> {
        let source = std::fs::read_to_string(&self.source)
            .with_context(|| format!("failed to read {}", self.source.display()))?;
        Ok(pipeline.compile(&source, &self.name).await?)
    }
}

fn write_artifacts(pipeline: &Pipeline, report: &CompileReport, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for summary in &report.artifacts {
        let Some(artifact) = summary.id.and_then(|id| pipeline.artifacts().get(&id)) else {
            continue;
        };
        let path = dir.join(artifact.name());
        std::fs::write(&path, artifact.bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}
