//! Isolated per-build workspaces.
//!
//! Every build gets its own directory `<root>/<program_name>-<uuid>`, scaffolded
//! as a one-program Anchor workspace. The [`WorkspaceHandle`] owns the
//! directory: [`WorkspaceManager::destroy`] removes it explicitly, and dropping
//! the handle removes it too, so cancelled or panicking builds leave nothing
//! behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{HostError, PipelineError};

pub const MAX_PROGRAM_NAME_LEN: usize = 64;

const ANCHOR_LANG_VERSION: &str = "0.30.1";

/// Placeholder program id written into `Anchor.toml`; the deployed id is
/// assigned by the planner.
const PLACEHOLDER_PROGRAM_ID: &str = "11111111111111111111111111111111";

#[derive(Debug)]
pub struct WorkspaceHandle {
    id: Uuid,
    program_name: String,
    path: PathBuf,
    removed: bool,
}

impl WorkspaceHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Crate directory of the single program in this workspace.
    pub fn program_dir(&self) -> PathBuf {
        self.path.join("programs").join(&self.program_name)
    }

    pub fn deploy_dir(&self) -> PathBuf {
        self.path.join("target").join("deploy")
    }

    pub fn idl_dir(&self) -> PathBuf {
        self.path.join("target").join("idl")
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for WorkspaceHandle {
    fn drop(&mut self) {
        self.remove();
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty, uniquely named workspace directory.
    pub async fn create_workspace(
        &self,
        program_name: &str,
    ) -> Result<WorkspaceHandle, PipelineError> {
        validate_program_name(program_name)?;

        let id = Uuid::new_v4();
        let path = self.root.join(format!("{program_name}-{id}"));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| HostError::io(&path, e))?;

        debug!(path = %path.display(), "workspace created");
        Ok(WorkspaceHandle {
            id,
            program_name: program_name.to_string(),
            path,
            removed: false,
        })
    }

    /// Write the Anchor project files around `source_text`.
    ///
    /// Returns the relative paths written, in order.
    pub async fn scaffold(
        &self,
        handle: &WorkspaceHandle,
        source_text: &str,
    ) -> Result<Vec<String>, HostError> {
        let name = handle.program_name();
        let lib = lib_name(name);
        let program_rel = format!("programs/{name}");

        let files = [
            ("Anchor.toml".to_string(), render_anchor_toml(&lib)),
            ("Cargo.toml".to_string(), render_workspace_toml()),
            (
                format!("{program_rel}/Cargo.toml"),
                render_program_toml(name, &lib),
            ),
            (format!("{program_rel}/Xargo.toml"), render_xargo_toml()),
            (format!("{program_rel}/src/lib.rs"), source_text.to_string()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (rel, contents) in files {
            let path = handle.path().join(&rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HostError::io(parent, e))?;
            }
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| HostError::io(&path, e))?;
            written.push(rel);
        }
        Ok(written)
    }

    /// Remove the workspace. Failures are logged, never returned.
    pub fn destroy(&self, mut handle: WorkspaceHandle) {
        handle.remove();
    }
}

/// Program names: 1 to 64 chars, a lowercase letter first, then lowercase
/// letters, digits, `_` or `-`.
pub fn validate_program_name(name: &str) -> Result<(), PipelineError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(PipelineError::InputValidation(
            "program name cannot be empty".to_string(),
        ));
    };
    if name.len() > MAX_PROGRAM_NAME_LEN {
        return Err(PipelineError::InputValidation(format!(
            "program name is longer than {MAX_PROGRAM_NAME_LEN} characters"
        )));
    }
    if !first.is_ascii_lowercase() {
        return Err(PipelineError::InputValidation(format!(
            "program name must start with a lowercase letter: {name}"
        )));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(PipelineError::InputValidation(format!(
            "program name must contain only lowercase letters, digits, '_' or '-': {name}"
        )));
    }
    Ok(())
}

/// Rust library name for a program (`my-prog` -> `my_prog`).
pub fn lib_name(program_name: &str) -> String {
    program_name.replace('-', "_")
}

fn render_anchor_toml(lib: &str) -> String {
    format!(
        "[toolchain]\n\n\
         [features]\n\
         resolution = true\n\
         skip-lint = false\n\n\
         [programs.localnet]\n\
         {lib} = \"{PLACEHOLDER_PROGRAM_ID}\"\n\n\
         [provider]\n\
         cluster = \"Localnet\"\n\
         wallet = \"~/.config/solana/id.json\"\n"
    )
}

fn render_workspace_toml() -> String {
    "[workspace]\n\
     members = [\"programs/*\"]\n\
     resolver = \"2\"\n\n\
     [profile.release]\n\
     overflow-checks = true\n\
     lto = \"fat\"\n\
     codegen-units = 1\n"
        .to_string()
}

fn render_program_toml(name: &str, lib: &str) -> String {
    format!(
        "[package]\n\
         name = \"{name}\"\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\n\
         [lib]\n\
         crate-type = [\"cdylib\", \"lib\"]\n\
         name = \"{lib}\"\n\n\
         [features]\n\
         default = []\n\
         cpi = [\"no-entrypoint\"]\n\
         no-entrypoint = []\n\
         no-idl = []\n\
         no-log-ix-name = []\n\
         idl-build = [\"anchor-lang/idl-build\"]\n\n\
         [dependencies]\n\
         anchor-lang = \"{ANCHOR_LANG_VERSION}\"\n"
    )
}

fn render_xargo_toml() -> String {
    "[target.bpfel-unknown-unknown.dependencies.std]\nfeatures = []\n".to_string()
}
