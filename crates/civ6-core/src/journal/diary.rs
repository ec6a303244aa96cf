//! Reflection diary (`diary_<civ>_<seed>.jsonl`).

use std::path::PathBuf;

use serde_json::{json, Map};

use super::writer::{GameJournal, JournalKind};
use crate::error::Result;

pub struct Diary {
    journal: GameJournal,
}

impl Diary {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            journal: GameJournal::new(JournalKind::Diary, dir, session),
        }
    }

    pub fn journal(&self) -> &GameJournal {
        &self.journal
    }

    pub fn reflect(&self, text: &str, tags: &[String]) -> Result<Option<u64>> {
        let mut fields = Map::new();
        fields.insert("entry".into(), json!(text));
        if !tags.is_empty() {
            fields.insert("tags".into(), json!(tags));
        }
        self.journal.record(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::read_entries;
    use tempfile::tempdir;

    #[test]
    fn test_reflect_with_tags() {
        let dir = tempdir().unwrap();
        let diary = Diary::new(dir.path(), "s");
        diary.journal().set_turn(40);
        diary
            .reflect("Pivot to science.", &["strategy".to_string()])
            .unwrap();
        diary.reflect("Plain note.", &[]).unwrap();
        diary.journal().bind("CIVILIZATION_GREECE", "77").unwrap();

        let entries = read_entries(&diary.journal().path().unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fields["tags"][0], "strategy");
        assert!(entries[1].fields.get("tags").is_none());
        assert_eq!(entries[1].turn, Some(40));
    }
}
