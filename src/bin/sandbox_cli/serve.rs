//! Serve command - run the HTTP API

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sol_sandbox_core::{Pipeline, SandboxConfig};
use tracing::info;

#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Listen address (default: SOL_SANDBOX_LISTEN or 127.0.0.1:8787)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Maximum request body size in bytes
    #[arg(long)]
    pub body_limit: Option<usize>,
}

impl ServeCmd {
    pub async fn execute(&self, config: &SandboxConfig, pipeline: Pipeline) -> Result<()> {
        let addr = self.listen.unwrap_or(config.listen_addr);
        let body_limit = self.body_limit.unwrap_or(config.body_limit_bytes);
        info!(
            network = %config.network,
            funder = ?pipeline.funding_account(),
            "starting sol-sandbox API"
        );
        sol_sandbox_server::serve_http(Arc::new(pipeline), addr, body_limit).await
    }
}
