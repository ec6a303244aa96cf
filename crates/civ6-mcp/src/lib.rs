//! MCP server for a running Civilization VI game
//!
//! Speaks JSON-RPC 2.0 over stdio and forwards tool calls to
//! [`civ6_core::ToolDispatcher`], which talks to the game's tuner socket.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use civ6_core::{CoreConfig, GameSession};
//! use civ6_mcp::{GameToolHandler, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Arc::new(GameSession::new(CoreConfig::default()));
//!     let mut server = McpServer::new(GameToolHandler::new(session.clone()));
//!     server.run().await?;
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handler::GameToolHandler;
pub use protocol::{Request, RequestId, Response, RpcError};
pub use server::{McpServer, ToolHandler};
pub use tools::{all_tools, get_tool, ToolContent, ToolDefinition, ToolResult};
