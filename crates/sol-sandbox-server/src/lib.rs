//! Exposed interfaces of the sol-sandbox pipeline: the axum HTTP API, the
//! JSON tool dispatcher with its request log, and the pieces the MCP binary
//! is built from.

#![allow(clippy::result_large_err)]

pub mod api;
pub mod error;
pub mod logging;
pub mod server;
pub mod state;
pub mod tools;

pub use api::{router, AppState};
pub use error::ApiError;
pub use logging::{init_tracing, LogConfig, RequestLogger};
pub use server::{serve_http, serve_on, shutdown_signal};
pub use state::ToolDispatcher;
