//! Tool-call trace journal (`log_<civ>_<seed>.jsonl`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::writer::{GameJournal, JournalKind};
use crate::error::Result;

const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallCategory {
    Query,
    Turn,
    Action,
}

impl CallCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCategory::Query => "query",
            CallCategory::Turn => "turn",
            CallCategory::Action => "action",
        }
    }
}

/// Bucket a tool by name: turn control, read-only lookups, everything else.
pub fn classify_call(tool: &str) -> CallCategory {
    match tool {
        "end_turn" => CallCategory::Turn,
        "get_game_overview" | "get_units" | "get_cities" | "get_map_area"
        | "get_settle_advisor" | "get_notifications" => CallCategory::Query,
        t if t.starts_with("get_") => CallCategory::Query,
        _ => CallCategory::Action,
    }
}

/// One tool invocation as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct ToolCallRecord<'a> {
    pub tool: &'a str,
    pub params: &'a Value,
    pub result: &'a str,
    pub success: bool,
    pub duration_ms: u64,
}

pub struct ToolCallLog {
    journal: GameJournal,
}

impl ToolCallLog {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            journal: GameJournal::new(JournalKind::Log, dir, session),
        }
    }

    pub fn journal(&self) -> &GameJournal {
        &self.journal
    }

    pub fn record_call(&self, call: &ToolCallRecord<'_>) -> Result<Option<u64>> {
        self.record_with_category(call, classify_call(call.tool))
    }

    /// Same as [`ToolCallLog::record_call`] with an explicit category, for
    /// tools whose effect depends on their parameters.
    pub fn record_with_category(
        &self,
        call: &ToolCallRecord<'_>,
        category: CallCategory,
    ) -> Result<Option<u64>> {
        let mut fields = Map::new();
        fields.insert("tool".into(), json!(call.tool));
        fields.insert("category".into(), json!(category.as_str()));
        fields.insert("params".into(), call.params.clone());
        fields.insert("result_summary".into(), json!(summarize(call.result)));
        fields.insert("result".into(), json!(call.result));
        fields.insert("success".into(), json!(call.success));
        fields.insert("ms".into(), json!(call.duration_ms));
        self.journal.record(fields)
    }
}

fn summarize(text: &str) -> String {
    text.chars().take(SUMMARY_CHARS).collect()
}
