//! Status command - reconcile and show a deployment

use anyhow::Result;
use clap::Parser;
use sol_sandbox_core::{parse_program_id, Pipeline};

use super::output::format_status;

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Program id (base58)
    pub program_id: String,
}

impl StatusCmd {
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let program_id = parse_program_id(&self.program_id)?;
        let status = pipeline.status(&program_id).await?;
        println!("{}", format_status(&status, json_output));
        Ok(())
    }
}
