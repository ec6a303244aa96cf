//! MCP server loop over newline-delimited JSON-RPC.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::protocol::{self, Request, RequestId, Response, RpcError};
use crate::tools::{self, ToolResult};

const SERVER_NAME: &str = "civ6-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Executes tool calls on behalf of the server
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run `name` with `arguments`. Failures come back as error results,
    /// not as JSON-RPC errors.
    async fn call(&self, name: &str, arguments: Value) -> ToolResult;
}

/// MCP server over newline-delimited JSON-RPC
pub struct McpServer<H: ToolHandler> {
    /// Tool handler
    handler: Arc<H>,
    /// Set once `initialize` has been answered
    initialized: bool,
}

impl<H: ToolHandler> McpServer<H> {
    /// Create a server around a tool handler
    pub fn new(handler: H) -> Self {
        McpServer {
            handler: Arc::new(handler),
            initialized: false,
        }
    }

    /// Serve on stdin/stdout until EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Starting MCP server on stdio");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve requests from `reader`, writing one response line per request
    /// to `writer`, until EOF.
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                info!("EOF received, shutting down");
                break;
            }
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            debug!("Received: {}", message);

            let Some(response) = self.handle_message(message).await else {
                continue;
            };
            let response_json = protocol::serialize_response_string(&response)?;
            debug!("Sending: {}", response_json);
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// `None` for notifications.
    async fn handle_message(&mut self, message: &str) -> Option<Response> {
        match protocol::parse_request_str(message) {
            Ok(request) if request.is_notification() => {
                debug!(method = %request.method, "Notification");
                None
            }
            Ok(request) => Some(self.handle_request(request).await),
            Err(err) => Some(Response::from_error(RequestId::Null, err)),
        }
    }

    async fn handle_request(&mut self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(RequestId::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => Response::success(id, json!({ "tools": tools::all_tools() })),
            "tools/call" => self.handle_tools_call(id, params).await,
            "ping" => Response::success(id, json!({})),
            method => {
                warn!("Unknown method: {}", method);
                Response::from_error(id, RpcError::MethodNotFound(method.to_string()))
            }
        }
    }

    fn handle_initialize(&mut self, id: RequestId) -> Response {
        self.initialized = true;
        info!("MCP server initialized");
        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION,
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: RequestId, params: Value) -> Response {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Response::from_error(id, RpcError::InvalidParams("missing 'name'".to_string()));
        };
        if tools::get_tool(name).is_none() {
            return Response::from_error(id, RpcError::InvalidParams(format!("unknown tool: {}", name)));
        }
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        if !self.initialized {
            warn!(tool = name, "tools/call before initialize");
        }
        debug!(tool = name, "Calling tool");
        let result = self.handler.call(name, arguments).await;
        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::from_error(id, RpcError::InternalError(e.to_string())),
        }
    }
}
