//! Tool catalogue and result types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry of the `tools/list` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name, as passed to `tools/call`
    pub name: String,
    /// Shown to the model when it picks a tool
    pub description: String,
    /// JSON Schema for the arguments.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A content block inside a tool result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text
    Text { text: String },
}

/// Result of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Content blocks, in order
    pub content: Vec<ToolContent>,
    /// `Some(true)` when the tool failed; omitted on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Successful result with one text block
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Failed result; the message is returned as plain text
    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }

    /// Text of the first block, or "" when there is none
    pub fn first_text(&self) -> &str {
        match self.content.first() {
            Some(ToolContent::Text { text }) => text,
            None => "",
        }
    }
}

fn no_args() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Every tool the server advertises
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        // ===== Queries =====
        ToolDefinition::new(
            "get_game_overview",
            "Current turn, civilization, yields and score. Call first: identifies the game for the journals.",
            no_args(),
        ),
        ToolDefinition::new(
            "get_units",
            "List your units with position, moves and health",
            no_args(),
        ),
        ToolDefinition::new(
            "get_cities",
            "List your cities with population and current production",
            no_args(),
        ),
        ToolDefinition::new(
            "get_map_area",
            "Describe the tiles in a square around a center tile",
            json!({
                "type": "object",
                "properties": {
                    "center_x": { "type": "integer" },
                    "center_y": { "type": "integer" },
                    "radius": {
                        "type": "integer",
                        "description": "Half-width of the square (default 2, max 5)"
                    }
                },
                "required": ["center_x", "center_y"]
            }),
        ),
        ToolDefinition::new(
            "get_settle_advisor",
            "Rank nearby city sites by food, production and water access",
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "integer", "description": "Search origin (default: first settler, else capital)" },
                    "y": { "type": "integer" },
                    "radius": { "type": "integer", "description": "Search radius (default 4)" }
                }
            }),
        ),
        ToolDefinition::new(
            "get_notifications",
            "Pending notifications, with locations when they have one",
            no_args(),
        ),
        // ===== Actions =====
        ToolDefinition::new(
            "unit_action",
            "Order a unit: move, attack, fortify, sleep, skip or found_city",
            json!({
                "type": "object",
                "properties": {
                    "unit_id": { "type": "integer" },
                    "action": {
                        "type": "string",
                        "enum": ["move", "attack", "fortify", "sleep", "skip", "found_city"]
                    },
                    "target_x": { "type": "integer", "description": "Required for move and attack" },
                    "target_y": { "type": "integer" }
                },
                "required": ["unit_id", "action"]
            }),
        ),
        ToolDefinition::new(
            "city_production",
            "Set what a city builds (unit, building or project type name)",
            json!({
                "type": "object",
                "properties": {
                    "city_id": { "type": "integer" },
                    "item": { "type": "string", "description": "e.g. UNIT_SETTLER, BUILDING_MONUMENT" }
                },
                "required": ["city_id", "item"]
            }),
        ),
        ToolDefinition::new(
            "end_turn",
            "Record this turn's map changes and end the turn",
            no_args(),
        ),
        ToolDefinition::new(
            "run_lua",
            "Run raw Lua in the game. Read mode uses the query state, write mode the command state.",
            json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" },
                    "mode": { "type": "string", "enum": ["read", "write"] },
                    "state_index": { "type": "integer", "description": "Explicit scripting state, overrides mode" }
                },
                "required": ["code"]
            }),
        ),
        // ===== Session =====
        ToolDefinition::new(
            "write_diary",
            "Append a reflection to this game's diary",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["text"]
            }),
        ),
        ToolDefinition::new(
            "spectate",
            "Start or stop the camera follower and popup dismisser",
            json!({
                "type": "object",
                "properties": {
                    "enabled": { "type": "boolean" }
                },
                "required": ["enabled"]
            }),
        ),
    ]
}

/// Look up a tool by name
pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_matches_dispatcher() {
        let tools = all_tools();
        let names: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names.len(), tools.len(), "duplicate tool name");
        for name in civ6_core::TOOL_NAMES {
            assert!(names.contains(*name), "missing schema for {name}");
        }
        assert_eq!(tools.len(), civ6_core::TOOL_NAMES.len());
    }

    #[test]
    fn test_get_tool() {
        assert!(get_tool("unit_action").is_some());
        assert!(get_tool("mission_submit").is_none());
    }

    #[test]
    fn test_error_result() {
        let result = ToolResult::error("Error: no game loaded");
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.first_text(), "Error: no game loaded");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["type"], "text");
    }
}
