//! Per-game journals
//!
//! Every file is append-only JSONL under the journal home and is named
//! `<kind>_<civ>_<seed>.jsonl`. Writers may start before the game identity is
//! known; entries queue in memory until `bind`.

mod diary;
mod tool_log;
mod writer;

pub use diary::Diary;
pub use tool_log::{classify_call, CallCategory, ToolCallLog, ToolCallRecord};
pub use writer::{game_id, read_entries, GameJournal, JournalEntry, JournalKind};
