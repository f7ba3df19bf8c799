//! Input types for the pipeline tools.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use sol_sandbox_core::{parse_program_id, AccountOverrides, PipelineResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileInput {
    #[serde(alias = "program_code")]
    pub program_code: String,
    #[serde(alias = "program_name")]
    pub program_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramIdInput {
    #[serde(alias = "program_id")]
    pub program_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadInput {
    #[serde(alias = "program_id")]
    pub program_id: String,
    #[serde(alias = "interface_descriptor", alias = "idl")]
    pub interface_descriptor: Value,
}

/// Body of an invocation. `accounts` maps IDL account names to base58
/// addresses; anything the IDL can resolve on its own may be left out.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeBody {
    pub method: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeInput {
    #[serde(alias = "program_id")]
    pub program_id: String,
    #[serde(flatten)]
    pub body: InvokeBody,
}

pub fn parse_accounts(raw: &HashMap<String, String>) -> PipelineResult<AccountOverrides> {
    raw.iter()
        .map(|(name, address)| Ok((name.clone(), parse_program_id(address)?)))
        .collect()
}
