use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServiceExt,
};
use serde_json::Value;

use std::sync::Arc;
use sol_sandbox_core::{Pipeline, SandboxConfig};
use sol_sandbox_server::{init_tracing, LogConfig, RequestLogger, ToolDispatcher};

#[derive(Clone)]
struct SolSandboxMcpServer {
    dispatcher: Arc<ToolDispatcher>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SolSandboxMcpServer {
    fn new(dispatcher: ToolDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            tool_router: Self::tool_router(),
        }
    }

    async fn dispatch_tool(
        &self,
        name: &str,
        params: Parameters<Value>,
    ) -> Result<CallToolResult, McpError> {
        let response = self.dispatcher.dispatch(name, params.0).await;
        let content_text = if response.success {
            "ok".to_string()
        } else {
            response
                .error
                .clone()
                .unwrap_or_else(|| "error".to_string())
        };
        Ok(CallToolResult {
            content: vec![Content::text(content_text)],
            structured_content: Some(response.to_json()),
            is_error: Some(!response.success),
            meta: None,
        })
    }

    #[tool(
        name = "compile_program",
        description = "Compile Anchor program source ({programCode, programName}) and store the artifacts"
    )]
    async fn compile_program(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("compile_program", params).await
    }

    #[tool(
        name = "deploy_program",
        description = "Deploy a program from programBuffer (base64), artifactId or buildId"
    )]
    async fn deploy_program(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("deploy_program", params).await
    }

    #[tool(
        name = "deployment_status",
        description = "Reconcile and report the on-chain status of a deployed program"
    )]
    async fn deployment_status(
        &self,
        params: Parameters<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("deployment_status", params).await
    }

    #[tool(name = "list_deployments", description = "List recorded deployments")]
    async fn list_deployments(
        &self,
        params: Parameters<Value>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("list_deployments", params).await
    }

    #[tool(
        name = "load_program",
        description = "Register an IDL for a deployed program so its methods can be invoked"
    )]
    async fn load_program(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("load_program", params).await
    }

    #[tool(
        name = "invoke_program",
        description = "Call a method of a loaded program with args and account addresses"
    )]
    async fn invoke_program(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("invoke_program", params).await
    }

    #[tool(name = "unload_program", description = "Forget a loaded program's IDL")]
    async fn unload_program(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("unload_program", params).await
    }

    #[tool(name = "list_programs", description = "List loaded programs and their methods")]
    async fn list_programs(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("list_programs", params).await
    }

    #[tool(name = "health", description = "Report RPC health and pipeline state")]
    async fn health(&self, params: Parameters<Value>) -> Result<CallToolResult, McpError> {
        self.dispatch_tool("health", params).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for SolSandboxMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "sol-sandbox MCP server. Use compile_program, then deploy_program with the returned buildId, then invoke_program."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("sol_sandbox=info", true)?;

    let config = SandboxConfig::from_env()?;
    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    let logger = RequestLogger::new(LogConfig::at(config.paths.request_logs_dir()));

    let server = SolSandboxMcpServer::new(ToolDispatcher::new(pipeline, logger));
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
