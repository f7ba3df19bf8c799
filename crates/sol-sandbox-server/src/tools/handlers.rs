//! Tool handler implementations.

use std::time::Instant;

use serde_json::{json, Value};
use sol_sandbox_core::{
    extract_input, parse_program_id, DeployRequest, ErrorKind, RecordStatus, ToolResponse,
};

use super::inputs::{parse_accounts, CompileInput, InvokeInput, LoadInput, ProgramIdInput};
use crate::api::ProgramView;
use crate::state::ToolDispatcher;

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl ToolDispatcher {
    pub(crate) async fn compile_program(&self, input: Value) -> ToolResponse {
        let parsed: CompileInput = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let report = match self
            .pipeline()
            .compile(&parsed.program_code, &parsed.program_name)
            .await
        {
            Ok(report) => report,
            Err(e) => return e.into(),
        };

        let duration_ms = report.duration_ms;
        if report.success {
            ToolResponse::ok(to_value(&report)).with_duration(duration_ms)
        } else {
            let message = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            ToolResponse::failed_with(to_value(&report), message, ErrorKind::Compile)
                .with_duration(duration_ms)
        }
    }

    pub(crate) async fn deploy_program(&self, input: Value) -> ToolResponse {
        let request: DeployRequest = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let start = Instant::now();
        let report = match self.pipeline().deploy(request).await {
            Ok(report) => report,
            Err(e) => return e.into(),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let warnings = report.warnings.clone();
        let response = match report.status {
            RecordStatus::Failed => ToolResponse::failed_with(
                to_value(&report),
                report
                    .error
                    .clone()
                    .unwrap_or_else(|| "deployment failed".to_string()),
                ErrorKind::TransactionRejected,
            ),
            _ => ToolResponse::ok(to_value(&report)),
        };
        response.with_warnings(warnings).with_duration(duration_ms)
    }

    pub(crate) async fn deployment_status(&self, input: Value) -> ToolResponse {
        let parsed: ProgramIdInput = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let program_id = match parse_program_id(&parsed.program_id) {
            Ok(id) => id,
            Err(e) => return e.into(),
        };
        self.pipeline().status(&program_id).await.into()
    }

    pub(crate) async fn list_deployments(&self, _input: Value) -> ToolResponse {
        ToolResponse::ok(json!({ "deployments": self.pipeline().deployments() }))
    }

    pub(crate) async fn load_program(&self, input: Value) -> ToolResponse {
        let parsed: LoadInput = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let program_id = match parse_program_id(&parsed.program_id) {
            Ok(id) => id,
            Err(e) => return e.into(),
        };
        self.pipeline()
            .load(program_id, parsed.interface_descriptor)
            .map(|handle| ProgramView::from(&handle))
            .into()
    }

    pub(crate) async fn invoke_program(&self, input: Value) -> ToolResponse {
        let parsed: InvokeInput = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let program_id = match parse_program_id(&parsed.program_id) {
            Ok(id) => id,
            Err(e) => return e.into(),
        };
        let accounts = match parse_accounts(&parsed.body.accounts) {
            Ok(accounts) => accounts,
            Err(e) => return e.into(),
        };

        let result = match self
            .pipeline()
            .invoke(&program_id, &parsed.body.method, &parsed.body.args, &accounts)
            .await
        {
            Ok(result) => result,
            Err(e) => return e.into(),
        };
        let payload = json!({
            "programId": program_id,
            "method": parsed.body.method,
            "signature": result.signature.to_string(),
            "status": result.status,
            "error": result.error.clone(),
        });
        match (result.status, result.error) {
            (RecordStatus::Failed, error) => ToolResponse::failed_with(
                payload,
                error.unwrap_or_else(|| "invocation failed".to_string()),
                ErrorKind::TransactionRejected,
            ),
            _ => ToolResponse::ok(payload),
        }
    }

    pub(crate) async fn unload_program(&self, input: Value) -> ToolResponse {
        let parsed: ProgramIdInput = match extract_input(input) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let program_id = match parse_program_id(&parsed.program_id) {
            Ok(id) => id,
            Err(e) => return e.into(),
        };
        self.pipeline()
            .unload(&program_id)
            .map(|handle| ProgramView::from(&handle))
            .into()
    }

    pub(crate) async fn list_programs(&self, _input: Value) -> ToolResponse {
        let programs: Vec<ProgramView> = self
            .pipeline()
            .list_programs()
            .iter()
            .map(ProgramView::from)
            .collect();
        ToolResponse::ok(json!({ "programs": programs }))
    }

    pub(crate) async fn health(&self, _input: Value) -> ToolResponse {
        ToolResponse::ok(to_value(&self.pipeline().health().await))
    }
}
