//! HTTP API for the build-and-deploy pipeline.
//!
//! Every JSON body carries a `timestamp`. Failures use [`ApiError`], which
//! maps pipeline error kinds onto 4xx (caller) or 5xx (pipeline) codes.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sol_sandbox_core::{
    parse_program_id, ArtifactSummary, CompileDiagnostic, DeployReport, DeployRequest,
    DeploymentRecord, HealthReport, Pipeline, ProgramHandle, RecordStatus,
};
use sol_sandbox_types::Pubkey;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::tools::inputs::{parse_accounts, InvokeBody};

/// Shared application state for the API.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

type ApiResult<T> = Result<T, ApiError>;

/// Creates the API router. `body_limit` caps request bodies in bytes.
pub fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Build and deploy
        .route("/compile", post(compile))
        .route("/deploy", post(deploy))
        .route("/deploy/status/{program_id}", get(deployment_status))
        .route("/deployments", get(list_deployments))
        // Program registry
        .route("/programs", get(list_programs))
        .route("/programs/{program_id}", delete(unload_program))
        .route("/programs/{program_id}/load", post(load_program))
        .route("/programs/{program_id}/invoke", post(invoke_program))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub program_code: String,
    pub program_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub success: bool,
    pub build_id: Uuid,
    /// Raw toolchain output.
    pub output: String,
    /// Human-readable error lines, one per diagnostic.
    pub errors: String,
    pub diagnostics: Vec<CompileDiagnostic>,
    pub artifacts: Vec<ArtifactSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: DeployReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub program_id: Pubkey,
    pub deployed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Pubkey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lamports: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramView {
    pub program_id: Pubkey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub methods: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

impl From<&ProgramHandle> for ProgramView {
    fn from(handle: &ProgramHandle) -> Self {
        Self {
            program_id: handle.program_id,
            name: handle
                .interface_descriptor
                .program_name()
                .map(str::to_string),
            methods: handle.methods(),
            loaded_at: handle.loaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramResponse {
    #[serde(flatten)]
    pub program: ProgramView,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramListResponse {
    pub programs: Vec<ProgramView>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    #[serde(alias = "idl")]
    pub interface_descriptor: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub success: bool,
    pub program_id: Pubkey,
    pub method: String,
    pub signature: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentRecord>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: HealthReport,
    pub timestamp: DateTime<Utc>,
}

/// Pending work answers 202, a transaction that landed with an error 502.
fn status_code_for(status: RecordStatus) -> StatusCode {
    match status {
        RecordStatus::Confirmed => StatusCode::OK,
        RecordStatus::Pending => StatusCode::ACCEPTED,
        RecordStatus::Failed => StatusCode::BAD_GATEWAY,
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.pipeline.health().await;
    let status = if report.rpc_healthy {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        report,
        timestamp: Utc::now(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.pipeline.metrics().render(),
    )
}

/// Compile source text. A failed build is a 422 that still carries the
/// diagnostics.
async fn compile(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompileRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let report = state
        .pipeline
        .compile(&request.program_code, &request.program_name)
        .await?;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    let errors = report
        .errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    info!(
        build_id = %report.build_id,
        success = report.success,
        artifacts = report.artifacts.len(),
        "compile request handled"
    );

    Ok((
        status,
        Json(CompileResponse {
            success: report.success,
            build_id: report.build_id,
            output: report.diagnostics,
            errors,
            diagnostics: report.errors,
            artifacts: report.artifacts,
            warnings: report.warnings,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        }),
    ))
}

async fn deploy(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let report = state.pipeline.deploy(request).await?;

    let status = status_code_for(report.status);
    let failed = report.status == RecordStatus::Failed;
    info!(program_id = %report.program_id, status = report.status.as_str(), "deploy request handled");

    Ok((
        status,
        Json(DeployResponse {
            success: !failed,
            error_kind: failed.then_some("transaction_rejected"),
            report,
            timestamp: Utc::now(),
        }),
    ))
}

async fn deployment_status(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let program_id = parse_program_id(&program_id)?;
    let status = state.pipeline.status(&program_id).await?;
    let record = status.record.as_ref();

    Ok(Json(StatusResponse {
        program_id: status.program_id,
        deployed: status.deployed,
        owner: status.owner,
        executable: status.executable,
        lamports: status.lamports,
        data_length: status.data_length,
        status: record.map(|r| r.status),
        signature: record.map(|r| r.signature.to_string()),
        error: record.and_then(|r| r.error.clone()),
        timestamp: Utc::now(),
    }))
}

async fn list_deployments(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(DeploymentListResponse {
        deployments: state.pipeline.deployments(),
        timestamp: Utc::now(),
    })
}

async fn list_programs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let programs = state
        .pipeline
        .list_programs()
        .iter()
        .map(ProgramView::from)
        .collect();
    Json(ProgramListResponse {
        programs,
        timestamp: Utc::now(),
    })
}

async fn load_program(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
    body: Result<Json<LoadRequest>, JsonRejection>,
) -> ApiResult<Json<ProgramResponse>> {
    let program_id = parse_program_id(&program_id)?;
    let Json(request) = body?;
    let handle = state
        .pipeline
        .load(program_id, request.interface_descriptor)?;
    Ok(Json(ProgramResponse {
        program: ProgramView::from(&handle),
        timestamp: Utc::now(),
    }))
}

async fn invoke_program(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
    body: Result<Json<InvokeBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let program_id = parse_program_id(&program_id)?;
    let Json(request) = body?;
    let accounts = parse_accounts(&request.accounts)?;
    let result = state
        .pipeline
        .invoke(&program_id, &request.method, &request.args, &accounts)
        .await?;

    Ok((
        status_code_for(result.status),
        Json(InvokeResponse {
            success: result.status != RecordStatus::Failed,
            program_id,
            method: request.method,
            signature: result.signature.to_string(),
            status: result.status,
            error: result.error,
            timestamp: Utc::now(),
        }),
    ))
}

async fn unload_program(
    State(state): State<Arc<AppState>>,
    Path(program_id): Path<String>,
) -> ApiResult<Json<ProgramResponse>> {
    let program_id = parse_program_id(&program_id)?;
    let handle = state.pipeline.unload(&program_id)?;
    Ok(Json(ProgramResponse {
        program: ProgramView::from(&handle),
        timestamp: Utc::now(),
    }))
}
