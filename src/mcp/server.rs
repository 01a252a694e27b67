//! MCP Server Implementation
//!
//! Transport-independent message handling plus the stdio transport. The
//! HTTP transport in [`crate::mcp::http`] feeds the same [`McpServer`].

use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::mcp::context::{AppContext, ProjectContext};
use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::tools::ToolRegistry;

/// MCP Server state and configuration
pub struct McpServer {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    tools: ToolRegistry,
    context: Arc<AppContext>,
}

impl McpServer {
    /// Create a server exposing every code search tool
    #[inline]
    pub fn new(context: Arc<AppContext>) -> Self {
        Self {
            server_info: Implementation {
                name: "code-rag".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            tools: ToolRegistry::create_default(&context),
            context,
        }
    }

    #[inline]
    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    #[inline]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one raw JSON-RPC payload
    ///
    /// # Arguments
    /// * `raw` - Message text as received
    /// * `project_root` - Project identifier attached to the call, if any
    ///
    /// # Returns
    /// The response to send back, or `None` for notifications
    #[inline]
    pub async fn handle_raw(&self, raw: &str, project_root: Option<&str>) -> Option<JsonRpcMessage> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                let error = McpError::ParseError {
                    message: e.to_string(),
                };
                error.log();
                return Some(error.to_error_response(None));
            }
        };
        self.handle_value(value, project_root).await
    }

    /// Handle one parsed JSON-RPC message
    #[inline]
    pub async fn handle_value(&self, value: Value, project_root: Option<&str>) -> Option<JsonRpcMessage> {
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        if value.is_array() {
            let error = McpError::InvalidRequest {
                message: "Batch requests are not supported".to_string(),
            };
            return Some(error.to_error_response(None));
        }

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let error = McpError::InvalidRequest {
                    message: e.to_string(),
                };
                error.log();
                return Some(error.to_error_response(id));
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            let error = McpError::InvalidRequest {
                message: format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            };
            return Some(error.to_error_response(request.id));
        }

        let Some(id) = request.id else {
            self.handle_notification(&request.method);
            return None;
        };

        match self
            .dispatch(&request.method, request.params, project_root)
            .await
        {
            Ok(result) => Some(JsonRpcMessage::Response(JsonRpcResponse::new(result, id))),
            Err(error) => {
                error.log();
                Some(error.to_error_response(Some(id)))
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>, project_root: Option<&str>) -> McpResult<Value> {
        match method {
            "initialize" => self.handle_initialize(params),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(serde_json::to_value(ListToolsResult {
                tools: self.tools.list_tools(),
            })?),
            "tools/call" => self.handle_call_tool(params, project_root).await,
            other => Err(McpError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => {
                debug!("Client finished initialization");
            }
            "notifications/cancelled" => {
                debug!("Received cancellation notification");
            }
            other => {
                warn!("Unknown notification method: {}", other);
            }
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| McpError::InvalidParameters {
                message: format!("Invalid initialize parameters: {}", e),
            })?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Initialize request missing parameters".to_string(),
                });
            }
        };

        let result = InitializeResult {
            protocol_version: negotiate_version(&params.protocol_version).to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: Some(
                "Semantic code search over the project named by the X-Project-Root header".to_string(),
            ),
        };

        let client = params
            .client_info
            .map_or_else(|| "unknown".to_string(), |info| info.name);
        info!("Client initialized: {}", client);
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&self, params: Option<Value>, project_root: Option<&str>) -> McpResult<Value> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| McpError::InvalidParameters {
                message: format!("Invalid tool call parameters: {}", e),
            })?,
            None => {
                return Err(McpError::InvalidParameters {
                    message: "Tool call request missing parameters".to_string(),
                });
            }
        };

        let handler = self.tools.get(&params.name).ok_or_else(|| McpError::ToolNotFound {
            name: params.name.clone(),
        })?;
        let definition = handler.definition();
        let project = ProjectContext::resolve(project_root)
            .map_err(|e| McpError::from_tool_error(&definition.name, e))?;
        let args = self.tools.validate(&definition.name, params.arguments)?;

        debug!("Calling {} for {}", definition.name, project.root().display());
        let result = handler.handle(&project, args).await;
        self.context.ensure_watcher(project.root()).await;
        Ok(serde_json::to_value(result?)?)
    }

    /// Serve newline-delimited JSON-RPC on stdin/stdout for one project
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>, project_root: PathBuf) -> Result<()> {
        info!(
            "Starting MCP server with stdio transport for {}",
            project_root.display()
        );
        let project = project_root.to_string_lossy().into_owned();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut reader = BufReader::new(stdin);

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    let message = line.trim();
                    if message.is_empty() {
                        continue;
                    }
                    if let Some(response) = self.handle_raw(message, Some(&project)).await {
                        send_message(&mut stdout, &response).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }

        info!("MCP server stopped");
        Ok(())
    }
}

/// Send a message to the client
async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
