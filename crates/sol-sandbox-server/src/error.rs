//! HTTP error mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use sol_sandbox_core::{ErrorKind, PipelineError};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Request body too large")]
    PayloadTooLarge,
}

impl ApiError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Pipeline(e) => e.kind().as_str(),
            Self::Malformed(_) => ErrorKind::InputValidation.as_str(),
            Self::PayloadTooLarge => "payload_too_large",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Pipeline(e) => status_for(e.kind()),
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Pipeline(PipelineError::Funding {
                required,
                available,
            }) => Some(json!({ "required": required, "available": available })),
            Self::Pipeline(PipelineError::UnknownMethod { available, .. }) => {
                Some(json!({ "available": available }))
            }
            _ => None,
        }
    }
}

/// Status code for an error kind: 4xx when the caller can fix the request,
/// 5xx when the pipeline or its network failed.
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputValidation | ErrorKind::UnknownMethod | ErrorKind::MissingAccount => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Compile => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Funding => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::NotLoaded => StatusCode::NOT_FOUND,
        ErrorKind::DeploymentPending => StatusCode::CONFLICT,
        ErrorKind::TransientNetwork => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::TransactionRejected => StatusCode::BAD_GATEWAY,
        ErrorKind::FatalSigning | ErrorKind::Host => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::Malformed(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Host failures carry paths and process details
        let message = match &self {
            Self::Pipeline(PipelineError::Host(e)) => {
                error!(error = %e, "host failure");
                "Internal server error".to_owned()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "errorKind": self.error_type(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}
