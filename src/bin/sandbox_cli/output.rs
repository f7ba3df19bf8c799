//! Output formatting for sol-sandbox CLI
//!
//! Human-readable text by default, pretty JSON with `--json`.

use serde::Serialize;
use sol_sandbox_core::{
    CompileReport, DeployReport, DeploymentStatus, InvokeResult, RecordStatus, ToolResponse,
};

pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_compile_report(report: &CompileReport, json_output: bool) -> String {
    if json_output {
        return to_json(report);
    }

    let mut out = String::new();
    if report.success {
        out.push_str(&format!(
            "\x1b[32m✓ Build {} succeeded\x1b[0m ({} ms)\n",
            report.build_id, report.duration_ms
        ));
    } else {
        out.push_str(&format!(
            "\x1b[31m✗ Build {} failed\x1b[0m ({} ms)\n",
            report.build_id, report.duration_ms
        ));
        for error in &report.errors {
            out.push_str(&format!("  {}\n", error));
        }
    }

    if !report.artifacts.is_empty() {
        out.push_str("\n\x1b[1mArtifacts:\x1b[0m\n");
        for artifact in &report.artifacts {
            out.push_str(&format!(
                "  {} ({} bytes, sha256 {})\n",
                artifact.name,
                artifact.size,
                &artifact.sha256[..artifact.sha256.len().min(16)]
            ));
        }
    }
    for warning in &report.warnings {
        out.push_str(&format!("\x1b[33mwarning:\x1b[0m {}\n", warning));
    }
    out
}

pub fn format_deploy_report(report: &DeployReport, json_output: bool) -> String {
    if json_output {
        return to_json(report);
    }

    let mut out = match report.status {
        RecordStatus::Confirmed => "\x1b[32m✓ Program deployed\x1b[0m\n".to_string(),
        RecordStatus::Pending => {
            "\x1b[33m… Deployment submitted, not yet confirmed\x1b[0m\n".to_string()
        }
        RecordStatus::Failed => format!(
            "\x1b[31m✗ Deployment failed: {}\x1b[0m\n",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    };
    out.push_str(&format!("  Program ID: \x1b[36m{}\x1b[0m\n", report.program_id));
    out.push_str(&format!("  Signature:  {}\n", report.signature));
    out.push_str(&format!("  Network:    {}\n", report.network));
    out.push_str(&format!(
        "  Rent:       {} lamports for {} bytes\n",
        report.minimum_rent_exempt_balance, report.artifact.size
    ));
    if let Some(url) = &report.explorer_url {
        out.push_str(&format!("  Explorer:   {}\n", url));
    }
    if report.loaded {
        out.push_str("  IDL loaded; methods can be invoked\n");
    }
    for warning in &report.warnings {
        out.push_str(&format!("\x1b[33mwarning:\x1b[0m {}\n", warning));
    }
    out
}

pub fn format_status(status: &DeploymentStatus, json_output: bool) -> String {
    if json_output {
        return to_json(status);
    }

    let mut out = if status.deployed {
        format!("\x1b[32m✓ {} is deployed\x1b[0m\n", status.program_id)
    } else {
        format!("\x1b[33m{} is not deployed\x1b[0m\n", status.program_id)
    };
    if let Some(owner) = &status.owner {
        out.push_str(&format!("  Owner:      {}\n", owner));
    }
    if let Some(lamports) = status.lamports {
        out.push_str(&format!("  Lamports:   {}\n", lamports));
    }
    if let Some(len) = status.data_length {
        out.push_str(&format!("  Data:       {} bytes\n", len));
    }
    if let Some(record) = &status.record {
        out.push_str(&format!("  Record:     {}\n", record.status.as_str()));
        if let Some(error) = &record.error {
            out.push_str(&format!("  Error:      {}\n", error));
        }
    }
    out
}

pub fn format_invoke_result(method: &str, result: &InvokeResult, json_output: bool) -> String {
    if json_output {
        return to_json(result);
    }
    match result.status {
        RecordStatus::Confirmed => format!(
            "\x1b[32m✓ {} confirmed\x1b[0m\n  Signature: {}\n",
            method, result.signature
        ),
        RecordStatus::Pending => format!(
            "\x1b[33m… {} submitted, not yet confirmed\x1b[0m\n  Signature: {}\n",
            method, result.signature
        ),
        RecordStatus::Failed => format!(
            "\x1b[31m✗ {} failed: {}\x1b[0m\n  Signature: {}\n",
            method,
            result.error.as_deref().unwrap_or("unknown error"),
            result.signature
        ),
    }
}

/// Format an error, keeping the pipeline error kind in JSON output.
pub fn format_error(error: &anyhow::Error, json_output: bool) -> String {
    if json_output {
        to_json(&ToolResponse::from_error(error))
    } else {
        let mut out = format!("\x1b[31mError:\x1b[0m {}\n", error);
        let mut causes = error.chain().skip(1).peekable();
        if causes.peek().is_some() {
            out.push_str("Caused by:\n");
            for (idx, cause) in causes.enumerate() {
                out.push_str(&format!("  {}: {}\n", idx + 1, cause));
            }
        }
        out
    }
}
