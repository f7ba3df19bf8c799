use std::path::PathBuf;

use sol_sandbox_types::env_utils::env_string;

/// On-disk layout under the sandbox home directory.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    base: PathBuf,
}

impl SandboxPaths {
    pub fn from_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base.clone()
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.base.join("workspaces")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn request_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("requests")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.logs_dir().join("deployments.jsonl")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.base.join("keys")
    }
}

pub fn default_paths() -> SandboxPaths {
    let base = env_string("SOL_SANDBOX_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".sol-sandbox")
        });
    SandboxPaths::from_base(base)
}
