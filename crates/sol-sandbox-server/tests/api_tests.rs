//! HTTP API tests over the in-process chain and the fake toolchain.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sol_sandbox_core::testing::{local_harness, sample_binary, sample_idl, FakeRunner, SAMPLE_PROGRAM};
use sol_sandbox_server::{router, AppState};
use sol_sandbox_types::encoding::base64_encode;
use sol_sandbox_types::Keypair;
use sol_transport::LocalChain;
use tower::ServiceExt;

const BODY_LIMIT: usize = 64 * 1024;

fn app(home: &std::path::Path, runner: FakeRunner) -> (Router, Arc<LocalChain>) {
    let harness = local_harness(home, runner).expect("harness");
    let chain = harness.chain.clone();
    let state = Arc::new(AppState {
        pipeline: Arc::new(harness.pipeline),
    });
    (router(state, BODY_LIMIT), chain)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// A successful compile returns the binary and IDL artifacts with a build id.
#[tokio::test]
async fn test_compile_success() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let (status, body) = send(
        &app,
        Method::POST,
        "/compile",
        Some(json!({ "programCode": SAMPLE_PROGRAM, "programName": "counter" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["buildId"].is_string());
    assert!(body["timestamp"].is_string());
    let artifacts = body["artifacts"].as_array().expect("artifacts");
    assert!(artifacts.iter().any(|a| a["kind"] == "binary"));
}

/// Source without program markers fails with a readable error and no artifacts.
#[tokio::test]
async fn test_compile_missing_markers() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let (status, body) = send(
        &app,
        Method::POST,
        "/compile",
        Some(json!({ "programCode": "fn main() {}", "programName": "plain" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["errors"]
        .as_str()
        .expect("errors string")
        .contains("Missing required"));
    assert_eq!(body["artifacts"], json!([]));
}

/// Missing fields are a caller fault.
#[tokio::test]
async fn test_compile_rejects_missing_fields() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let (status, body) = send(&app, Method::POST, "/compile", Some(json!({ "programName": "x" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorKind"], "input_validation");
    assert!(body["timestamp"].is_string());
}

/// Deploying a base64 buffer creates an executable program account.
#[tokio::test]
async fn test_deploy_buffer_and_status() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, chain) = app(home.path(), FakeRunner::succeeding());

    let (status, body) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({
            "programBuffer": base64_encode(&sample_binary()),
            "programName": "counter",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "confirmed");
    let program_id = body["programId"].as_str().expect("programId").to_string();
    assert!(!body["signature"].as_str().expect("signature").is_empty());
    let account = chain
        .account(&program_id.parse().expect("pubkey"))
        .expect("program account");
    assert!(account.executable);

    let (status, body) = send(&app, Method::GET, &format!("/deploy/status/{program_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployed"], true);
    assert_eq!(body["executable"], true);
    assert_eq!(body["dataLength"], sample_binary().len());
    assert_eq!(body["status"], "confirmed");
}

/// Invalid base64 and invalid program ids are 4xx.
#[tokio::test]
async fn test_caller_faults_are_4xx() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let (status, body) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": "%%%not base64%%%" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "input_validation");

    let (status, body) = send(&app, Method::GET, "/deploy/status/not-a-key", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "input_validation");
}

/// An underfunded deploy reports the required and available lamports.
#[tokio::test]
async fn test_deploy_underfunded() {
    let home = tempfile::tempdir().expect("tempdir");
    let harness = local_harness(home.path(), FakeRunner::succeeding()).expect("harness");
    harness.chain.set_balance(&harness.funder.pubkey(), 10);
    let app = router(
        Arc::new(AppState {
            pipeline: Arc::new(harness.pipeline),
        }),
        BODY_LIMIT,
    );

    let (status, body) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": base64_encode(&sample_binary()) })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["errorKind"], "funding");
    assert_eq!(body["details"]["available"], 10);
    assert!(body["details"]["required"].as_u64().expect("required") > 10);
}

/// compile, deploy by build id, then invoke the auto-loaded program.
#[tokio::test]
async fn test_compile_deploy_invoke_flow() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, chain) = app(home.path(), FakeRunner::succeeding());

    let (_, compiled) = send(
        &app,
        Method::POST,
        "/compile",
        Some(json!({ "programCode": SAMPLE_PROGRAM, "programName": "counter" })),
    )
    .await;
    let build_id = compiled["buildId"].as_str().expect("buildId");

    let (status, deployed) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "buildId": build_id, "programName": "counter" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{deployed}");
    assert_eq!(deployed["loaded"], true);
    let program_id = deployed["programId"].as_str().expect("programId").to_string();

    let (status, listed) = send(&app, Method::GET, "/programs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["programs"][0]["programId"], program_id.as_str());
    assert_eq!(listed["programs"][0]["methods"], json!(["initialize", "increment"]));

    let counter = Keypair::generate().pubkey().to_string();
    let (status, invoked) = send(
        &app,
        Method::POST,
        &format!("/programs/{program_id}/invoke"),
        Some(json!({
            "method": "increment",
            "args": { "amount": 5 },
            "accounts": { "counter": counter },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{invoked}");
    assert_eq!(invoked["status"], "confirmed");
    assert_eq!(chain.invocations().len(), 1);

    let (status, unknown) = send(
        &app,
        Method::POST,
        &format!("/programs/{program_id}/invoke"),
        Some(json!({ "method": "decrement" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown["errorKind"], "unknown_method");
    assert_eq!(unknown["details"]["available"], json!(["initialize", "increment"]));

    let (status, _) = send(&app, Method::DELETE, &format!("/programs/{program_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/programs/{program_id}/invoke"),
        Some(json!({ "method": "increment", "args": [1], "accounts": { "counter": counter } })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "not_loaded");
}

/// An unconfirmed deploy answers 202 and loading is refused until it settles.
#[tokio::test]
async fn test_pending_deploy_blocks_load() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, chain) = app(home.path(), FakeRunner::succeeding());
    chain.delay_next_sends(1);

    let (status, deployed) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": base64_encode(&sample_binary()) })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{deployed}");
    assert_eq!(deployed["status"], "pending");
    let program_id = deployed["programId"].as_str().expect("programId").to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/programs/{program_id}/load"),
        Some(json!({ "interfaceDescriptor": sample_idl() })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "deployment_pending");

    chain.deliver_delayed();
    let (_, status_body) = send(&app, Method::GET, &format!("/deploy/status/{program_id}"), None).await;
    assert_eq!(status_body["deployed"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/programs/{program_id}/load"),
        Some(json!({ "interfaceDescriptor": sample_idl() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "counter");
}

/// A send that never gets an answer still reports the program id, so the
/// caller can follow up with the status endpoint.
#[tokio::test]
async fn test_send_timeout_reports_program_id() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, chain) = app(home.path(), FakeRunner::succeeding());
    chain.time_out_next_sends(10);

    let (status, deployed) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": base64_encode(&sample_binary()) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{deployed}");
    assert_eq!(deployed["status"], "confirmed");
    let program_id = deployed["programId"].as_str().expect("programId").to_string();

    let (_, body) = send(&app, Method::GET, &format!("/deploy/status/{program_id}"), None).await;
    assert_eq!(body["deployed"], true);

    chain.fail_next_sends(10);
    let (status, pending) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": base64_encode(&sample_binary()) })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{pending}");
    assert_eq!(pending["status"], "pending");
    assert!(pending["programId"].is_string());
    assert!(pending["signature"].is_string());
}

/// Bodies over the configured limit are refused.
#[tokio::test]
async fn test_body_limit() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let huge = "A".repeat(BODY_LIMIT * 2);
    let (status, _) = send(
        &app,
        Method::POST,
        "/deploy",
        Some(json!({ "programBuffer": huge })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

/// Health, deployments and metrics respond without any prior activity.
#[tokio::test]
async fn test_health_and_metrics() {
    let home = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(home.path(), FakeRunner::succeeding());

    let (status, health) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["network"], "local");
    assert!(health["fundingAccount"].is_string());

    let (status, deployments) = send(&app, Method::GET, "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployments["deployments"], json!([]));

    let response = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("sol_sandbox_rpc_retries_total"));
}
