use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sol_sandbox(home: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("sol-sandbox").unwrap();
    cmd.env("SOL_SANDBOX_HOME", home.path())
        .env_remove("SOL_SANDBOX_RPC_URL")
        .env_remove("SOL_SANDBOX_NETWORK")
        .env_remove("SOL_SANDBOX_LOCAL");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    sol_sandbox(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("invoke"))
        .stdout(predicate::str::contains("serve"));
}

/// Source without program markers is rejected before any toolchain runs.
#[test]
fn test_compile_missing_markers() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("lib.rs");
    std::fs::write(&source, "fn main() {}\n").unwrap();

    sol_sandbox(&home)
        .args(["--local", "compile"])
        .arg(&source)
        .args(["--name", "plain"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Missing required"));
}

#[test]
fn test_compile_invalid_name_json() {
    let home = TempDir::new().unwrap();
    let source = home.path().join("lib.rs");
    std::fs::write(&source, "use anchor_lang::prelude::*;\n#[program]\nmod x {}\n").unwrap();

    sol_sandbox(&home)
        .args(["--local", "--json", "compile"])
        .arg(&source)
        .args(["--name", "../escape"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error_kind\": \"input_validation\""));
}

/// A binary deployed to the in-process chain confirms in one call.
#[test]
fn test_deploy_binary_local() {
    let home = TempDir::new().unwrap();
    let binary = home.path().join("counter.so");
    let mut bytes = b"\x7fELF".to_vec();
    bytes.extend(std::iter::repeat(7u8).take(196));
    std::fs::write(&binary, &bytes).unwrap();

    let output = sol_sandbox(&home)
        .args(["--local", "--json", "deploy", "--name", "counter", "--binary"])
        .arg(&binary)
        .assert()
        .success()
        .get_output()
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "confirmed");
    assert_eq!(report["network"], "local");
    assert_eq!(report["artifact"]["size"], 200);
    assert!(report["programId"].as_str().unwrap().len() >= 32);
    assert!(report.get("explorerUrl").is_none());
}

#[test]
fn test_deploy_requires_a_source() {
    let home = TempDir::new().unwrap();
    sol_sandbox(&home)
        .args(["--local", "deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--binary"));
}

#[test]
fn test_status_unknown_program() {
    let home = TempDir::new().unwrap();
    sol_sandbox(&home)
        .args(["--local", "status", "11111111111111111111111111111111"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is not deployed"));
}

#[test]
fn test_status_invalid_program_id() {
    let home = TempDir::new().unwrap();
    sol_sandbox(&home)
        .args(["--local", "status", "not-a-program-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid program id"));
}
