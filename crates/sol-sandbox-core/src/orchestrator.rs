//! Build orchestration: source text in, artifacts out.
//!
//! One call to [`BuildOrchestrator::compile`] owns one [`BuildSession`]. The
//! session's workspace is destroyed before `compile` returns, whatever the
//! outcome. Compiler errors are data ([`CompilationResult`] with
//! `success == false`); only host failures become `Err`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::{HostError, PipelineError};
use crate::runner::{ToolchainOutput, ToolchainRunner};
use crate::workspace::{validate_program_name, WorkspaceHandle, WorkspaceManager};

pub const MISSING_STRUCTURE_DIAGNOSTIC: &str =
    "Missing required anchor_lang::prelude imports or program structure";

pub const NO_BINARY_DIAGNOSTIC: &str = "build succeeded but produced no program binary";

/// State for a single build, alive only during `compile`.
#[derive(Debug)]
pub struct BuildSession {
    pub session_id: Uuid,
    pub source_text: String,
    pub program_name: String,
    pub work_dir: WorkspaceHandle,
    pub created_at: DateTime<Utc>,
}

/// A compiler error with its source location, when one was reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileDiagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl CompileDiagnostic {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(column) = self.column {
                    write!(f, ":{column}")?;
                }
            }
            write!(f, ": ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
    pub build_id: Uuid,
    pub success: bool,
    /// Raw toolchain output, or the reason the toolchain never ran.
    pub diagnostics: String,
    pub errors: Vec<CompileDiagnostic>,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl CompilationResult {
    fn failed(build_id: Uuid, diagnostics: String, errors: Vec<CompileDiagnostic>, start: Instant) -> Self {
        Self {
            build_id,
            success: false,
            diagnostics,
            errors,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn binary(&self) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.is_binary())
    }

    pub fn interface_descriptor(&self) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .find(|a| a.kind() == ArtifactKind::InterfaceDescriptor)
    }
}

pub struct BuildOrchestrator {
    workspaces: WorkspaceManager,
    runner: Arc<dyn ToolchainRunner>,
    build_timeout: Duration,
}

impl BuildOrchestrator {
    pub fn new(
        workspaces: WorkspaceManager,
        runner: Arc<dyn ToolchainRunner>,
        build_timeout: Duration,
    ) -> Self {
        Self {
            workspaces,
            runner,
            build_timeout,
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    #[instrument(skip(self, source_text), fields(program = %program_name))]
    pub async fn compile(
        &self,
        source_text: &str,
        program_name: &str,
    ) -> Result<CompilationResult, PipelineError> {
        validate_program_name(program_name)?;
        let build_id = Uuid::new_v4();
        let start = Instant::now();

        if !has_program_structure(source_text) {
            info!("source rejected before build: missing program structure");
            return Ok(CompilationResult::failed(
                build_id,
                MISSING_STRUCTURE_DIAGNOSTIC.to_string(),
                vec![CompileDiagnostic::message(MISSING_STRUCTURE_DIAGNOSTIC)],
                start,
            ));
        }

        let session = BuildSession {
            session_id: build_id,
            source_text: source_text.to_string(),
            program_name: program_name.to_string(),
            work_dir: self.workspaces.create_workspace(program_name).await?,
            created_at: Utc::now(),
        };

        // If this future is dropped mid-build the handle's Drop removes the
        // directory instead.
        let outcome = self.build_in(&session, start).await;
        self.workspaces.destroy(session.work_dir);
        let result = outcome?;

        info!(
            build_id = %result.build_id,
            success = result.success,
            artifacts = result.artifacts.len(),
            duration_ms = result.duration_ms,
            "build finished"
        );
        Ok(result)
    }

    async fn build_in(
        &self,
        session: &BuildSession,
        start: Instant,
    ) -> Result<CompilationResult, HostError> {
        self.workspaces
            .scaffold(&session.work_dir, &session.source_text)
            .await?;

        let output = self
            .runner
            .run(session.work_dir.path(), self.build_timeout)
            .await?;

        if output.timed_out {
            let message = format!(
                "build timed out after {}s",
                self.build_timeout.as_secs_f32()
            );
            let mut diagnostics = output.combined();
            if !diagnostics.is_empty() {
                diagnostics.push('\n');
            }
            diagnostics.push_str(&message);
            return Ok(CompilationResult::failed(
                session.session_id,
                diagnostics,
                vec![CompileDiagnostic::message(message)],
                start,
            ));
        }

        if !output.success() {
            let errors = parse_compile_errors(&output);
            return Ok(CompilationResult::failed(
                session.session_id,
                output.combined(),
                errors,
                start,
            ));
        }

        let mut warnings = parse_compile_warnings(&output);
        let artifacts = collect_artifacts(&session.work_dir, &mut warnings).await?;

        if !artifacts.iter().any(Artifact::is_binary) {
            let mut result = CompilationResult::failed(
                session.session_id,
                output.combined(),
                vec![CompileDiagnostic::message(NO_BINARY_DIAGNOSTIC)],
                start,
            );
            result.warnings = warnings;
            return Ok(result);
        }

        Ok(CompilationResult {
            build_id: session.session_id,
            success: true,
            diagnostics: output.combined(),
            errors: Vec::new(),
            artifacts,
            warnings,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// A program source needs a `#[program]` module and the Anchor prelude.
pub fn has_program_structure(source: &str) -> bool {
    source.contains("#[program]") && source.contains("anchor_lang::prelude")
}

async fn collect_artifacts(
    workspace: &WorkspaceHandle,
    warnings: &mut Vec<String>,
) -> Result<Vec<Artifact>, HostError> {
    let mut artifacts = Vec::new();
    for (path, bytes) in read_dir_with_extension(&workspace.deploy_dir(), "so").await? {
        artifacts.push(Artifact::new(file_stem(&path), ArtifactKind::Binary, bytes));
    }

    let idls = read_dir_with_extension(&workspace.idl_dir(), "json").await?;
    if idls.is_empty() {
        warn!(program = workspace.program_name(), "build produced no IDL");
        warnings.push("no interface descriptor (IDL) was produced".to_string());
    }
    for (path, bytes) in idls {
        artifacts.push(Artifact::new(
            file_stem(&path),
            ArtifactKind::InterfaceDescriptor,
            bytes,
        ));
    }
    Ok(artifacts)
}

/// Files in `dir` with `extension`, sorted by path. A missing dir is empty.
async fn read_dir_with_extension(
    dir: &Path,
    extension: &str,
) -> Result<Vec<(std::path::PathBuf, Vec<u8>)>, HostError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HostError::io(dir, e)),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| HostError::io(dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| HostError::io(&path, e))?;
        files.push((path, bytes));
    }
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parse `error[E0425]: message` lines and their `--> file:line:col`
/// locations out of cargo/rustc output.
pub fn parse_compile_errors(output: &ToolchainOutput) -> Vec<CompileDiagnostic> {
    let text = format!("{}\n{}", output.stdout, output.stderr);
    let mut errors = Vec::new();
    let mut current: Option<CompileDiagnostic> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("error") {
            if let Some(done) = current.take() {
                errors.push(done);
            }
            let (code, message) = split_code(rest);
            if is_summary_error(message) {
                continue;
            }
            current = Some(CompileDiagnostic {
                code,
                message: message.to_string(),
                file: None,
                line: None,
                column: None,
            });
        } else if let Some(location) = line.trim_start().strip_prefix("-->") {
            if let Some(diag) = current.as_mut().filter(|d| d.file.is_none()) {
                let mut parts = location.trim().split(':');
                diag.file = parts.next().map(str::to_string);
                diag.line = parts.next().and_then(|p| p.parse().ok());
                diag.column = parts.next().and_then(|p| p.parse().ok());
            }
        }
    }
    if let Some(done) = current {
        errors.push(done);
    }

    if errors.is_empty() {
        let first = output
            .stderr
            .lines()
            .chain(output.stdout.lines())
            .find(|l| !l.trim().is_empty());
        let message = match (first, output.exit_code) {
            (Some(line), _) => line.trim().to_string(),
            (None, Some(code)) => format!("toolchain exited with status {code}"),
            (None, None) => "toolchain terminated by signal".to_string(),
        };
        errors.push(CompileDiagnostic::message(message));
    }
    errors
}

fn split_code(rest: &str) -> (Option<String>, &str) {
    if let Some(inner) = rest.strip_prefix('[') {
        if let Some((code, tail)) = inner.split_once(']') {
            let message = tail.trim_start_matches(':').trim();
            return (Some(code.to_string()), message);
        }
    }
    (None, rest.trim_start_matches(':').trim())
}

fn is_summary_error(message: &str) -> bool {
    message.starts_with("could not compile") || message.starts_with("aborting due to")
}

fn parse_compile_warnings(output: &ToolchainOutput) -> Vec<String> {
    format!("{}\n{}", output.stdout, output.stderr)
        .lines()
        .filter_map(|line| line.strip_prefix("warning:"))
        .map(str::trim)
        .filter(|w| !w.contains("generated") || !w.contains("warning"))
        .map(str::to_string)
        .collect()
}
