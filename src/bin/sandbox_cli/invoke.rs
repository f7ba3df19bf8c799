//! Invoke command - call a method of a deployed program through its IDL

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use sol_sandbox_core::{parse_program_id, AccountOverrides, Pipeline, PipelineError, RecordStatus};

use super::output::format_invoke_result;

#[derive(Parser, Debug)]
pub struct InvokeCmd {
    /// Program id (base58)
    pub program_id: String,

    /// Method name as it appears in the IDL
    pub method: String,

    /// IDL JSON describing the program
    #[arg(long)]
    pub idl: PathBuf,

    /// Arguments as a JSON array or object
    #[arg(long, default_value = "null")]
    pub args: String,

    /// Account address for an IDL account (e.g., counter=<pubkey>)
    #[arg(long = "account", value_parser = parse_account_assignment)]
    pub accounts: Vec<(String, String)>,
}

fn parse_account_assignment(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid account assignment '{}', expected 'name=address'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

impl InvokeCmd {
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let program_id = parse_program_id(&self.program_id)?;
        let idl: Value = serde_json::from_slice(
            &std::fs::read(&self.idl)
                .with_context(|| format!("failed to read {}", self.idl.display()))?,
        )
        .context("IDL file is not valid JSON")?;
        let args: Value = serde_json::from_str(&self.args).context("--args is not valid JSON")?;

        let accounts = self
            .accounts
            .iter()
            .map(|(name, address)| Ok((name.clone(), parse_program_id(address)?)))
            .collect::<Result<AccountOverrides, PipelineError>>()?;

        pipeline.load(program_id, idl)?;
        let result = pipeline
            .invoke(&program_id, &self.method, &args, &accounts)
            .await?;
        println!("{}", format_invoke_result(&self.method, &result, json_output));

        match (result.status, result.error) {
            (RecordStatus::Failed, error) => Err(PipelineError::TransactionRejected(
                error.unwrap_or_else(|| "invocation failed".to_string()),
            )
            .into()),
            _ => Ok(()),
        }
    }
}
