use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use sol_sandbox_core::{Pipeline, ToolMeta, ToolResponse};
use tracing::warn;
use uuid::Uuid;

use crate::logging::{redact_sensitive, LogRecord, RequestLogger};

/// Routes named tool calls with JSON input to the pipeline and logs each
/// call to the request log.
pub struct ToolDispatcher {
    pipeline: Arc<Pipeline>,
    logger: RequestLogger,
}

impl ToolDispatcher {
    pub fn new(pipeline: Arc<Pipeline>, logger: RequestLogger) -> Self {
        Self { pipeline, logger }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn logger(&self) -> &RequestLogger {
        &self.logger
    }

    pub async fn dispatch(&self, tool: &str, input: Value) -> ToolResponse {
        let (meta, clean_input) = extract_meta(&input);
        let request_id = meta
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let start = Instant::now();

        let result = self.dispatch_inner(tool, clean_input.clone()).await;

        let duration_ms = start.elapsed().as_millis();
        let record = LogRecord {
            ts: Utc::now().to_rfc3339(),
            request_id,
            tool: tool.to_string(),
            input: redact_sensitive(&clean_input),
            output: redact_sensitive(&result.to_json()),
            duration_ms,
            success: result.success,
            error: result.error.clone(),
            error_kind: result.error_kind.map(|k| k.as_str().to_string()),
            reason: meta.reason,
        };
        if let Err(e) = self.logger.log_tool_call(&record) {
            warn!(error = %e, tool, "failed to write request log");
        }

        result
    }

    async fn dispatch_inner(&self, tool: &str, input: Value) -> ToolResponse {
        match tool {
            "compile_program" => self.compile_program(input).await,
            "deploy_program" => self.deploy_program(input).await,
            "deployment_status" => self.deployment_status(input).await,
            "list_deployments" => self.list_deployments(input).await,
            "load_program" => self.load_program(input).await,
            "invoke_program" => self.invoke_program(input).await,
            "unload_program" => self.unload_program(input).await,
            "list_programs" => self.list_programs(input).await,
            "health" => self.health(input).await,
            _ => ToolResponse::error(format!("Unknown tool: {}", tool)),
        }
    }
}

fn extract_meta(input: &Value) -> (ToolMeta, Value) {
    let mut meta = ToolMeta::default();
    if let Value::Object(map) = input {
        if let Some(Value::Object(meta_map)) = map.get("_meta") {
            if let Some(Value::String(reason)) = meta_map.get("reason") {
                meta.reason = Some(reason.clone());
            }
            if let Some(Value::String(req)) = meta_map.get("request_id") {
                meta.request_id = Some(req.clone());
            }
        }

        let mut cleaned = map.clone();
        cleaned.remove("_meta");
        return (meta, Value::Object(cleaned));
    }
    (meta, input.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_is_stripped_from_input() {
        let (meta, clean) = extract_meta(&json!({
            "programId": "abc",
            "_meta": { "reason": "check status", "request_id": "req-7" }
        }));
        assert_eq!(meta.reason.as_deref(), Some("check status"));
        assert_eq!(meta.request_id.as_deref(), Some("req-7"));
        assert_eq!(clean, json!({ "programId": "abc" }));
    }

    #[test]
    fn non_object_input_passes_through() {
        let (meta, clean) = extract_meta(&json!([1, 2]));
        assert!(meta.request_id.is_none());
        assert_eq!(clean, json!([1, 2]));
    }
}
