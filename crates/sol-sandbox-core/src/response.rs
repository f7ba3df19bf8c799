//! Unified tool response shared by the CLI, the tool dispatcher and MCP.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,

    pub result: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Stable classification of `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            error_kind: None,
            error_details: None,
            warnings: Vec::new(),
            duration_ms: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
            error_kind: None,
            error_details: None,
            warnings: Vec::new(),
            duration_ms: None,
        }
    }

    /// A failed operation whose result still carries data (a failed build's
    /// diagnostics, a deployment that landed with an error).
    pub fn failed_with(result: Value, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            result,
            error_kind: Some(kind),
            ..Self::error(message)
        }
    }

    pub fn from_pipeline_error(err: &PipelineError) -> Self {
        let mut response = Self::error(err.to_string());
        response.error_kind = Some(err.kind());
        if let PipelineError::Funding {
            required,
            available,
        } = err
        {
            response.error_details = Some(serde_json::json!({
                "required": required,
                "available": available,
            }));
        }
        response
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(pipeline) = err.downcast_ref::<PipelineError>() {
            return Self::from_pipeline_error(pipeline);
        }
        let mut response = Self::error(err.to_string());
        let chain: Vec<String> = err.chain().skip(1).map(|e| e.to_string()).collect();
        if !chain.is_empty() {
            response.error_details = Some(serde_json::json!({ "cause_chain": chain }));
        }
        response
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<PipelineError> for ToolResponse {
    fn from(err: PipelineError) -> Self {
        Self::from_pipeline_error(&err)
    }
}

impl<T: Serialize> From<Result<T, PipelineError>> for ToolResponse {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => Self::ok(serde_json::to_value(value).unwrap_or(Value::Null)),
            Err(err) => Self::from_pipeline_error(&err),
        }
    }
}

/// Deserialize a tool input, turning failures into an error response.
pub fn extract_input<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ToolResponse> {
    serde_json::from_value(value).map_err(|e| {
        let mut response = ToolResponse::error(format!("Invalid input: {e}"));
        response.error_kind = Some(ErrorKind::InputValidation);
        response
    })
}

/// Caller-supplied metadata stripped from tool input before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pipeline_errors_carry_kind() {
        let response = ToolResponse::from(PipelineError::Funding {
            required: 10,
            available: 1,
        });
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::Funding));
        assert_eq!(response.error_details.unwrap()["required"], 10);
    }

    #[test]
    fn anyhow_wrapping_keeps_pipeline_kind() {
        let err = anyhow::Error::new(PipelineError::InputValidation("bad".into()));
        let response = ToolResponse::from_error(&err);
        assert_eq!(response.error_kind, Some(ErrorKind::InputValidation));
    }

    #[test]
    fn ok_response_omits_error_fields() {
        let json = ToolResponse::ok(json!({"a": 1})).to_json();
        assert_eq!(json, json!({"success": true, "result": {"a": 1}}));
    }

    #[test]
    fn bad_input_is_input_validation() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Input {
            name: String,
        }
        let err = extract_input::<Input>(json!({"nope": 1})).unwrap_err();
        assert_eq!(err.error_kind, Some(ErrorKind::InputValidation));
    }
}
