//! Bridges MCP tool calls onto the game session.

use std::sync::Arc;

use civ6_core::{GameSession, ToolDispatcher};
use serde_json::Value;

use crate::server::ToolHandler;
use crate::tools::ToolResult;

pub struct GameToolHandler {
    dispatcher: ToolDispatcher,
}

impl GameToolHandler {
    pub fn new(session: Arc<GameSession>) -> Self {
        Self {
            dispatcher: ToolDispatcher::new(session),
        }
    }

    pub fn session(&self) -> &Arc<GameSession> {
        self.dispatcher.session()
    }
}

#[async_trait::async_trait]
impl ToolHandler for GameToolHandler {
    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let output = self.dispatcher.call(name, arguments).await;
        if output.success {
            ToolResult::text(output.text)
        } else {
            ToolResult::error(output.text)
        }
    }
}
