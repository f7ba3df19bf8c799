//! Toolchain execution capability.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{IsolationMode, SandboxConfig};
use crate::error::HostError;
use crate::sandbox::BubblewrapBuilder;

const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Captured result of one toolchain run.
#[derive(Debug, Clone, Default)]
pub struct ToolchainOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ToolchainOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout and stderr joined for display.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs the build toolchain inside a scaffolded workspace.
///
/// A non-zero exit or a timeout is a normal [`ToolchainOutput`]; only failing
/// to start the process at all is an error.
#[async_trait]
pub trait ToolchainRunner: Send + Sync {
    async fn run(&self, workspace: &Path, limit: Duration) -> Result<ToolchainOutput, HostError>;
}

/// Spawns the configured toolchain command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: Vec<String>,
    isolation: IsolationMode,
    bwrap: PathBuf,
    toolchain_paths: Vec<PathBuf>,
    cargo_home: Option<PathBuf>,
}

impl ProcessRunner {
    /// Unconfined runner for `command`; see [`ProcessRunner::with_isolation`].
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            isolation: IsolationMode::None,
            bwrap: PathBuf::from("bwrap"),
            toolchain_paths: Vec::new(),
            cargo_home: None,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            command: config.toolchain_command.clone(),
            isolation: config.isolation,
            bwrap: PathBuf::from("bwrap"),
            toolchain_paths: config.toolchain_paths.clone(),
            cargo_home: config.cargo_home.clone(),
        }
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn with_bwrap(mut self, path: impl Into<PathBuf>) -> Self {
        self.bwrap = path.into();
        self
    }

    pub fn isolation(&self) -> IsolationMode {
        self.isolation
    }

    fn command_for(&self, workspace: &Path) -> Result<Command, HostError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| HostError::Other("toolchain command is empty".to_string()))?;

        let cmd = match self.isolation {
            IsolationMode::None => {
                let mut cmd = Command::new(program);
                cmd.args(args).current_dir(workspace);
                cmd
            }
            IsolationMode::Bubblewrap => {
                let mut builder = BubblewrapBuilder::new().binary(&self.bwrap);
                for path in &self.toolchain_paths {
                    if path.exists() {
                        builder = builder.bind_ro(path, path);
                    }
                }
                let nix_store = Path::new("/nix");
                if nix_store.exists() {
                    builder = builder.bind_ro(nix_store, nix_store);
                }
                if let Some(cargo_home) = self.cargo_home.as_ref().filter(|p| p.exists()) {
                    builder = builder.bind_ro(cargo_home, "/cargo").env("CARGO_HOME", "/cargo");
                }
                builder = builder
                    .bind_rw(workspace, "/build")
                    .env("PATH", std::env::var("PATH").unwrap_or_default())
                    .env("HOME", "/build")
                    .env("USER", "build")
                    .cwd("/build");
                builder.build(program, args)
            }
        };
        Ok(cmd)
    }
}

#[async_trait]
impl ToolchainRunner for ProcessRunner {
    async fn run(&self, workspace: &Path, limit: Duration) -> Result<ToolchainOutput, HostError> {
        let mut cmd = self.command_for(workspace)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = self.command.first().cloned().unwrap_or_default();
        debug!(program = %program, isolation = ?self.isolation, "spawning toolchain");
        let start = Instant::now();

        // Never fall back to an unconfined run when the wrapper is missing.
        let mut child = cmd.spawn().map_err(|e| match self.isolation {
            IsolationMode::Bubblewrap => HostError::Sandbox(format!(
                "failed to spawn {}: {e}",
                self.bwrap.display()
            )),
            IsolationMode::None => HostError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            },
        })?;

        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let (exit_code, timed_out) = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                return Err(HostError::Spawn {
                    program,
                    message: format!("wait failed: {e}"),
                })
            }
            Err(_) => {
                warn!(program = %program, limit_secs = limit.as_secs(), "toolchain timed out");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out toolchain");
                }
                (None, true)
            }
        };

        let stdout = join_output(stdout_task).await;
        let stderr = join_output(stderr_task).await;
        let duration = start.elapsed();

        info!(
            program = %program,
            exit_code = ?exit_code,
            timed_out,
            duration_ms = duration.as_millis() as u64,
            "toolchain finished"
        );

        Ok(ToolchainOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration,
        })
    }
}

/// Grandchildren of a killed toolchain can keep the pipes open.
async fn join_output(task: JoinHandle<String>) -> String {
    match timeout(OUTPUT_GRACE, task).await {
        Ok(Ok(output)) => output,
        _ => String::new(),
    }
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}
