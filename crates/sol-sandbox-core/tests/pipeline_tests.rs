//! End-to-end pipeline tests against the in-process chain.
//!
//! Builds go through `FakeRunner`; deployments and invocations run on a
//! `LocalChain`, with its fault hooks standing in for network trouble.

use std::sync::Arc;

use serde_json::json;
use sol_sandbox_core::config::default_loader_id;
use sol_sandbox_core::error::ErrorKind;
use sol_sandbox_core::executor::EXPIRED_ERROR;
use sol_sandbox_core::idl::sighash;
use sol_sandbox_core::orchestrator::MISSING_STRUCTURE_DIAGNOSTIC;
use sol_sandbox_core::testing::{
    local_harness, sample_binary, sample_idl, test_config, FakeBuild, FakeRunner, LocalHarness,
    SAMPLE_PROGRAM,
};
use sol_sandbox_core::{
    AccountOverrides, ArtifactKind, DeployRequest, DeploymentLedger, Pipeline, PipelineError,
    PipelineServices, RecordStatus,
};
use sol_sandbox_types::encoding::base64_encode;
use sol_sandbox_types::{Keypair, Pubkey};
use sol_transport::local::rent_exempt_minimum;
use sol_transport::LocalChain;
use tempfile::TempDir;

fn harness(runner: FakeRunner) -> (TempDir, LocalHarness) {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = local_harness(dir.path(), runner).expect("harness");
    (dir, harness)
}

fn buffer_request(bytes: &[u8]) -> DeployRequest {
    DeployRequest {
        program_buffer: Some(base64_encode(bytes)),
        program_name: Some("counter".to_string()),
        ..Default::default()
    }
}

/// Deploy a freshly compiled build and return its program id.
async fn deploy_counter(h: &LocalHarness) -> Pubkey {
    let report = h
        .pipeline
        .compile(SAMPLE_PROGRAM, "counter")
        .await
        .expect("compile");
    assert!(report.success, "compile failed: {}", report.diagnostics);

    let deployed = h
        .pipeline
        .deploy(DeployRequest {
            build_id: Some(report.build_id),
            program_name: Some("counter".to_string()),
            ..Default::default()
        })
        .await
        .expect("deploy");
    assert_eq!(deployed.status, RecordStatus::Confirmed);
    deployed.program_id
}

// =============================================================================
// Compile
// =============================================================================

#[tokio::test]
async fn test_source_without_program_markers_is_rejected_before_build() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let source = "pub fn main() { println!(\"hi\"); }";

    let report = h.pipeline.compile(source, "plain").await.expect("compile");

    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].message, MISSING_STRUCTURE_DIAGNOSTIC);
    assert_eq!(
        report.errors[0].message,
        "Missing required anchor_lang::prelude imports or program structure"
    );
    assert!(report.artifacts.is_empty());
    assert_eq!(h.runner.run_count(), 0, "toolchain must not run");
    assert_eq!(h.pipeline.metrics().builds("failure"), 1);
}

#[tokio::test]
async fn test_valid_source_yields_binary_and_descriptor() {
    let (_dir, h) = harness(FakeRunner::succeeding());

    let report = h
        .pipeline
        .compile(SAMPLE_PROGRAM, "counter")
        .await
        .expect("compile");

    assert!(report.success);
    let binaries: Vec<_> = report
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Binary)
        .collect();
    let descriptors: Vec<_> = report
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::InterfaceDescriptor)
        .collect();
    assert_eq!(binaries.len(), 1);
    assert_eq!(descriptors.len(), 1);

    // Stored artifacts keep size == bytes.len().
    for summary in &report.artifacts {
        let id = summary.id.expect("stored artifact id");
        let stored = h.pipeline.artifacts().get(&id).expect("artifact stored");
        assert_eq!(stored.size(), stored.bytes().len());
        assert_eq!(stored.size(), summary.size);
    }
    assert_eq!(binaries[0].size, sample_binary().len());
    assert_eq!(h.pipeline.metrics().builds("success"), 1);
}

#[tokio::test]
async fn test_workspace_removed_after_success_failure_and_timeout() {
    let runners = [
        FakeRunner::succeeding(),
        FakeRunner::failing("error: linker `cc` not found"),
        FakeRunner::new(FakeBuild::TimeOut),
        FakeRunner::new(FakeBuild::NoOutput),
    ];

    for runner in runners {
        let (dir, h) = harness(runner);
        let report = h
            .pipeline
            .compile(SAMPLE_PROGRAM, "counter")
            .await
            .expect("compile");

        let runs = h.runner.runs();
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].exists(), "workspace {} left behind", runs[0].display());
        let leftovers = std::fs::read_dir(dir.path().join("workspaces"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "success={}", report.success);
    }
}

#[tokio::test]
async fn test_compiler_errors_are_parsed() {
    let stderr = "error[E0425]: cannot find value `count` in this scope\n  \
                  --> programs/counter/src/lib.rs:12:9\n   |\n\
                  error: could not compile `counter` due to 1 previous error\n";
    let (_dir, h) = harness(FakeRunner::failing(stderr));

    let report = h
        .pipeline
        .compile(SAMPLE_PROGRAM, "counter")
        .await
        .expect("compile");

    assert!(!report.success);
    assert!(report.artifacts.is_empty());
    assert_eq!(report.errors.len(), 1);
    let err = &report.errors[0];
    assert_eq!(err.code.as_deref(), Some("E0425"));
    assert_eq!(err.file.as_deref(), Some("programs/counter/src/lib.rs"));
    assert_eq!(err.line, Some(12));
    assert_eq!(err.column, Some(9));
    assert!(report.diagnostics.contains("could not compile"));
}

#[tokio::test]
async fn test_timeout_reports_failure_with_diagnostic() {
    let (_dir, h) = harness(FakeRunner::new(FakeBuild::TimeOut));

    let report = h
        .pipeline
        .compile(SAMPLE_PROGRAM, "counter")
        .await
        .expect("compile");

    assert!(!report.success);
    assert!(report.errors[0].message.contains("timed out"));
}

#[tokio::test]
async fn test_invalid_program_name_is_input_error() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let err = h
        .pipeline
        .compile(SAMPLE_PROGRAM, "../escape")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputValidation);
    assert_eq!(h.runner.run_count(), 0);
}

// =============================================================================
// Deploy
// =============================================================================

#[tokio::test]
async fn test_deploy_creates_executable_loader_owned_account() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let binary = sample_binary();

    let report = h
        .pipeline
        .deploy(buffer_request(&binary))
        .await
        .expect("deploy");

    assert_eq!(report.status, RecordStatus::Confirmed);
    assert_eq!(report.network, "local");
    assert!(report.explorer_url.is_none());
    assert_eq!(
        report.minimum_rent_exempt_balance,
        rent_exempt_minimum(binary.len())
    );

    let account = h.chain.account(&report.program_id).expect("program account");
    assert!(account.executable);
    assert_eq!(account.owner, default_loader_id());
    assert_eq!(account.data, binary);
    assert_eq!(account.lamports, rent_exempt_minimum(binary.len()));

    let status = h.pipeline.status(&report.program_id).await.expect("status");
    assert!(status.deployed);
    assert_eq!(status.data_length, Some(binary.len()));
    assert_eq!(h.pipeline.metrics().deployments("confirmed"), 1);
}

#[tokio::test]
async fn test_same_binary_deploys_to_distinct_program_ids() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let binary = sample_binary();

    let first = h.pipeline.deploy(buffer_request(&binary)).await.expect("first");
    let second = h.pipeline.deploy(buffer_request(&binary)).await.expect("second");

    assert_ne!(first.program_id, second.program_id);
    assert_eq!(h.pipeline.deployments().len(), 2);
}

#[tokio::test]
async fn test_underfunded_deploy_fails_before_submission() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let required = rent_exempt_minimum(1024);
    h.chain.set_balance(&h.funder.pubkey(), required - 1);

    let err = h
        .pipeline
        .deploy(buffer_request(&[7u8; 1024]))
        .await
        .unwrap_err();

    match err {
        PipelineError::Funding {
            required: needed,
            available,
        } => {
            assert!(needed > required);
            assert_eq!(available, required - 1);
        }
        other => panic!("expected funding error, got {other:?}"),
    }
    // Nothing was signed or sent: no record, no fee charged.
    assert!(h.pipeline.deployments().is_empty());
    assert_eq!(
        h.chain.account(&h.funder.pubkey()).expect("funder").lamports,
        required - 1
    );
}

#[tokio::test]
async fn test_failed_deploy_leaves_no_partial_account() {
    // The pipeline deploys through a loader the chain does not know, so the
    // third instruction fails after the first two would have succeeded.
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.loader_id = Pubkey::new([7; 32]);
    let chain = Arc::new(LocalChain::new(default_loader_id()));
    let funder = Arc::new(Keypair::generate());
    chain.airdrop(&funder.pubkey(), 1_000_000_000_000);
    let pipeline = Pipeline::new(
        &config,
        PipelineServices {
            runner: Arc::new(FakeRunner::succeeding()),
            rpc: chain.clone(),
            funder: Some(funder),
            ledger: Arc::new(DeploymentLedger::in_memory()),
        },
    )
    .expect("pipeline");

    // Preflight rejects the transaction outright.
    let err = pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionRejected);
    let rejected = &pipeline.deployments()[0];
    assert_eq!(rejected.status, RecordStatus::Failed);
    assert!(chain.account(&rejected.program_id).is_none());

    // Without preflight it lands, fails, and still creates nothing.
    chain.set_preflight(false);
    let report = pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("landed with error");
    assert_eq!(report.status, RecordStatus::Failed);
    assert!(report.error.expect("error").contains("ProgramAccountNotFound"));
    assert!(chain.account(&report.program_id).is_none());
}

#[tokio::test]
async fn test_unconfirmed_deploy_is_settled_by_status() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    h.chain.delay_next_sends(1);

    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy");
    assert_eq!(report.status, RecordStatus::Pending);
    assert!(report.error.is_none(), "a timeout is never reported as failed");

    let before = h.pipeline.status(&report.program_id).await.expect("status");
    assert!(!before.deployed);
    assert_eq!(before.record.expect("record").status, RecordStatus::Pending);

    assert!(h.chain.deliver_delayed()[0].is_ok());

    let after = h.pipeline.status(&report.program_id).await.expect("status");
    assert!(after.deployed);
    assert_eq!(after.record.expect("record").status, RecordStatus::Confirmed);
}

#[tokio::test]
async fn test_status_is_idempotent() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy");

    let first = h.pipeline.status(&report.program_id).await.expect("status");
    let second = h.pipeline.status(&report.program_id).await.expect("status");
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );

    let unknown = h.pipeline.status(&Pubkey::new([42; 32])).await.expect("status");
    assert!(!unknown.deployed);
    assert!(unknown.owner.is_none());
    assert!(unknown.record.is_none());
}

#[tokio::test]
async fn test_lost_deploy_fails_once_blockhash_expires() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    h.chain.drop_next_sends(1);

    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy");
    assert_eq!(report.status, RecordStatus::Pending);

    h.chain.advance_blocks(200);
    let status = h.pipeline.status(&report.program_id).await.expect("status");
    assert!(!status.deployed);
    let record = status.record.expect("record");
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(EXPIRED_ERROR));
}

#[tokio::test]
async fn test_transient_send_failures_are_retried() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    h.chain.fail_next_sends(2);

    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy");

    assert_eq!(report.status, RecordStatus::Confirmed);
    assert!(h.pipeline.metrics().rpc_retries() >= 2);
}

#[tokio::test]
async fn test_send_timeout_after_landing_is_reconciled() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    // Every attempt lands (or is already processed) but the caller only
    // ever sees a timeout.
    h.chain.time_out_next_sends(10);

    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy is reconciled, not failed");

    assert_eq!(report.status, RecordStatus::Confirmed);
    assert!(report.error.is_none());
    let account = h.chain.account(&report.program_id).expect("program account");
    assert!(account.executable);
    assert_eq!(
        h.pipeline.deployments()[0].status,
        RecordStatus::Confirmed
    );
}

#[tokio::test]
async fn test_unreachable_send_leaves_deploy_pending() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    h.chain.fail_next_sends(10);

    let report = h
        .pipeline
        .deploy(buffer_request(&sample_binary()))
        .await
        .expect("deploy");
    assert_eq!(report.status, RecordStatus::Pending);
    assert!(report.error.is_none());

    let status = h.pipeline.status(&report.program_id).await.expect("status");
    assert!(!status.deployed);
    assert_eq!(status.record.expect("record").status, RecordStatus::Pending);

    h.chain.advance_blocks(200);
    let status = h.pipeline.status(&report.program_id).await.expect("status");
    let record = status.record.expect("record");
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(EXPIRED_ERROR));
}

#[tokio::test]
async fn test_deploy_input_validation() {
    let (_dir, h) = harness(FakeRunner::succeeding());

    let none = h.pipeline.deploy(DeployRequest::default()).await.unwrap_err();
    assert_eq!(none.kind(), ErrorKind::InputValidation);

    let bad_base64 = h
        .pipeline
        .deploy(DeployRequest {
            program_buffer: Some("%%%".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(bad_base64.kind(), ErrorKind::InputValidation);

    let both = h
        .pipeline
        .deploy(DeployRequest {
            program_buffer: Some(base64_encode(&[1, 2, 3])),
            artifact_id: Some(uuid::Uuid::new_v4()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(both.kind(), ErrorKind::InputValidation);

    let bad_idl = h
        .pipeline
        .deploy(DeployRequest {
            interface_descriptor: Some(json!({"instructions": "nope"})),
            ..buffer_request(&sample_binary())
        })
        .await
        .unwrap_err();
    assert_eq!(bad_idl.kind(), ErrorKind::InputValidation);
    assert!(h.pipeline.deployments().is_empty());
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_deploy_from_build_loads_descriptor_and_invokes() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let program_id = deploy_counter(&h).await;

    let programs = h.pipeline.list_programs();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].program_id, program_id);
    assert_eq!(programs[0].methods(), vec!["initialize", "increment"]);

    let counter = Pubkey::new([5; 32]);
    let mut accounts = AccountOverrides::new();
    accounts.insert("counter".to_string(), counter);

    let result = h
        .pipeline
        .invoke(&program_id, "increment", &json!({"amount": 5}), &accounts)
        .await
        .expect("invoke");
    assert_eq!(result.status, RecordStatus::Confirmed);

    let invocations = h.chain.invocations();
    assert_eq!(invocations.len(), 1);
    let call = &invocations[0];
    assert_eq!(call.program_id, program_id);
    assert_eq!(call.accounts, vec![counter]);
    let mut expected = sighash("increment").to_vec();
    expected.extend(5u64.to_le_bytes());
    assert_eq!(call.data, expected);
    assert_eq!(call.signature, result.signature);
}

#[tokio::test]
async fn test_invoke_fills_payer_and_system_program() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let program_id = deploy_counter(&h).await;
    let counter = Pubkey::new([6; 32]);
    let mut accounts = AccountOverrides::new();
    accounts.insert("counter".to_string(), counter);

    h.pipeline
        .invoke(&program_id, "initialize", &json!([]), &accounts)
        .await
        .expect("invoke");

    let call = &h.chain.invocations()[0];
    assert_eq!(
        call.accounts,
        vec![counter, h.funder.pubkey(), sol_sandbox_types::SYSTEM_PROGRAM_ID]
    );
}

#[tokio::test]
async fn test_registry_errors() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let program_id = deploy_counter(&h).await;
    let no_accounts = AccountOverrides::new();

    let unknown = h
        .pipeline
        .invoke(&program_id, "decrement", &json!({}), &no_accounts)
        .await
        .unwrap_err();
    match unknown {
        PipelineError::UnknownMethod { method, available, .. } => {
            assert_eq!(method, "decrement");
            assert_eq!(available, vec!["initialize", "increment"]);
        }
        other => panic!("expected UnknownMethod, got {other:?}"),
    }

    let missing = h
        .pipeline
        .invoke(&program_id, "increment", &json!({"amount": 1}), &no_accounts)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::MissingAccount);

    let bad_args = h
        .pipeline
        .invoke(&program_id, "increment", &json!({"amount": "lots"}), &no_accounts)
        .await
        .unwrap_err();
    assert_eq!(bad_args.kind(), ErrorKind::InputValidation);

    h.pipeline.unload(&program_id).expect("unload");
    let not_loaded = h
        .pipeline
        .invoke(&program_id, "increment", &json!({"amount": 1}), &no_accounts)
        .await
        .unwrap_err();
    assert_eq!(not_loaded.kind(), ErrorKind::NotLoaded);
    assert_eq!(
        h.pipeline.unload(&program_id).unwrap_err().kind(),
        ErrorKind::NotLoaded
    );
    assert!(h.chain.invocations().is_empty());
}

#[tokio::test]
async fn test_load_refused_while_deployment_pending() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    h.chain.delay_next_sends(1);
    let report = h
        .pipeline
        .deploy(DeployRequest {
            interface_descriptor: Some(sample_idl()),
            ..buffer_request(&sample_binary())
        })
        .await
        .expect("deploy");
    assert_eq!(report.status, RecordStatus::Pending);
    assert!(!report.loaded);
    assert!(!report.warnings.is_empty());

    let err = h.pipeline.load(report.program_id, sample_idl()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeploymentPending);

    h.chain.deliver_delayed();
    h.pipeline.status(&report.program_id).await.expect("status");
    let handle = h
        .pipeline
        .load(report.program_id, sample_idl())
        .expect("load after confirmation");
    assert_eq!(handle.program_id, report.program_id);
}

#[tokio::test]
async fn test_load_replaces_descriptor() {
    let (_dir, h) = harness(FakeRunner::succeeding());
    let program_id = deploy_counter(&h).await;

    let mut idl = sample_idl();
    idl["instructions"]
        .as_array_mut()
        .expect("instructions")
        .truncate(1);
    h.pipeline.load(program_id, idl).expect("reload");

    let handle = &h.pipeline.list_programs()[0];
    assert_eq!(handle.methods(), vec!["initialize"]);
}
