//! sol-sandbox
//!
//! Build-and-deploy sandbox for Anchor programs. This crate ships the
//! `sol-sandbox` CLI and re-exports the workspace crates:
//!
//! - [`types`]: keys, transactions, instruction builders, encoding helpers
//! - [`transport`]: chain RPC clients and the in-process `LocalChain`
//! - [`pipeline`]: workspaces, builds, artifacts, deployment and the program registry
//! - [`server`]: HTTP API, tool dispatcher and request log

pub use sol_sandbox_core as pipeline;
pub use sol_sandbox_server as server;
pub use sol_sandbox_types as types;
pub use sol_transport as transport;

pub use sol_sandbox_core::{Pipeline, PipelineError, SandboxConfig};
