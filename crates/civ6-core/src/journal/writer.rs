//! Per-game append-only JSONL writer with deferred binding.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Journal file families. Each maps to `<kind>_<civ>_<seed>.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalKind {
    Diary,
    Log,
    Spatial,
    MapTurns,
}

impl JournalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalKind::Diary => "diary",
            JournalKind::Log => "log",
            JournalKind::Spatial => "spatial",
            JournalKind::MapTurns => "mapturns",
        }
    }

    pub fn file_name(&self, civ: &str, seed: &str) -> String {
        format!("{}_{}.jsonl", self.as_str(), game_id(civ, seed))
    }
}

/// `<civ>_<seed>` with anything outside `[A-Za-z0-9_-]` replaced.
pub fn game_id(civ: &str, seed: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}_{}", clean(civ), clean(seed))
}

/// One journal line. Kind-specific fields are flattened after the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub game: String,
    pub civ: String,
    pub seed: String,
    pub session: String,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    pub seq: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

const RESERVED_KEYS: [&str; 7] = ["game", "civ", "seed", "session", "ts", "turn", "seq"];

struct Binding {
    civ: String,
    seed: String,
    path: PathBuf,
    next_seq: u64,
}

/// Recorded before the game identity was known. The sequence number is
/// assigned when the entry is flushed.
struct PendingEntry {
    ts: String,
    turn: Option<u32>,
    fields: Map<String, Value>,
}

#[derive(Default)]
struct WriterState {
    turn: Option<u32>,
    binding: Option<Binding>,
    pending: Vec<PendingEntry>,
}

pub struct GameJournal {
    kind: JournalKind,
    dir: PathBuf,
    session: String,
    state: Mutex<WriterState>,
}

impl GameJournal {
    pub fn new(kind: JournalKind, dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            kind,
            dir: dir.into(),
            session: session.into(),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn kind(&self) -> JournalKind {
        self.kind
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn set_turn(&self, turn: u32) {
        self.lock().turn = Some(turn);
    }

    pub fn turn(&self) -> Option<u32> {
        self.lock().turn
    }

    pub fn is_bound(&self) -> bool {
        self.lock().binding.is_some()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock().binding.as_ref().map(|b| b.path.clone())
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Attach the journal to a game. Binding again to the same identity is a
    /// no-op; binding to a different identity switches files.
    pub fn bind(&self, civ: &str, seed: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(b) = &state.binding {
            if b.civ == civ && b.seed == seed {
                return Ok(());
            }
            info!(
                kind = self.kind.as_str(),
                from = %game_id(&b.civ, &b.seed),
                to = %game_id(civ, seed),
                "Journal switching games"
            );
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(self.kind.file_name(civ, seed));
        let mut binding = Binding {
            civ: civ.to_string(),
            seed: seed.to_string(),
            next_seq: count_lines(&path)?,
            path,
        };

        // Queued entries stay queued until they are on disk.
        if !state.pending.is_empty() {
            let mut buf = String::new();
            for (offset, entry) in state.pending.iter().enumerate() {
                let seq = binding.next_seq + offset as u64;
                buf.push_str(&self.entry_line(&binding, seq, &entry.ts, entry.turn, &entry.fields)?);
            }
            let mut file = open_append(&binding.path)?;
            file.write_all(buf.as_bytes())?;
            file.flush()?;

            let count = state.pending.len();
            binding.next_seq += count as u64;
            state.pending.clear();
            debug!(kind = self.kind.as_str(), count, "Flushed buffered journal entries");
        }

        debug!(
            kind = self.kind.as_str(),
            path = %binding.path.display(),
            next_seq = binding.next_seq,
            "Journal bound"
        );
        state.binding = Some(binding);
        Ok(())
    }

    /// Append an entry, or queue it until [`GameJournal::bind`].
    ///
    /// Returns the sequence number when the line hit the disk. A failed
    /// write consumes no sequence number.
    pub fn record(&self, mut fields: Map<String, Value>) -> Result<Option<u64>> {
        for key in RESERVED_KEYS {
            if fields.remove(key).is_some() {
                warn!(kind = self.kind.as_str(), key, "Dropping reserved field from journal entry");
            }
        }

        let mut state = self.lock();
        let ts = Utc::now().to_rfc3339();
        let turn = state.turn;
        let Some(binding) = state.binding.as_mut() else {
            state.pending.push(PendingEntry { ts, turn, fields });
            return Ok(None);
        };

        let seq = binding.next_seq;
        let line = self.entry_line(binding, seq, &ts, turn, &fields)?;
        let mut file = open_append(&binding.path)?;
        file.write_all(line.as_bytes())?;
        binding.next_seq += 1;
        Ok(Some(seq))
    }

    fn entry_line(
        &self,
        binding: &Binding,
        seq: u64,
        ts: &str,
        turn: Option<u32>,
        fields: &Map<String, Value>,
    ) -> Result<String> {
        let entry = JournalEntry {
            game: game_id(&binding.civ, &binding.seed),
            civ: binding.civ.clone(),
            seed: binding.seed.clone(),
            session: self.session.clone(),
            ts: ts.to_string(),
            turn,
            seq,
            fields: fields.clone(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        Ok(line)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn count_lines(path: &Path) -> std::io::Result<u64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Read every entry of a journal file. Unparseable lines are skipped.
pub fn read_entries(path: &Path) -> std::io::Result<Vec<JournalEntry>> {
    let file = File::open(path)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_unbound_entries_flush_on_bind() {
        let dir = tempdir().unwrap();
        let journal = GameJournal::new(JournalKind::Diary, dir.path(), "sess-1");
        journal.set_turn(3);

        assert_eq!(journal.record(fields(json!({"entry": "a"}))).unwrap(), None);
        assert_eq!(journal.record(fields(json!({"entry": "b"}))).unwrap(), None);
        assert_eq!(journal.pending_len(), 2);
        assert!(!journal.is_bound());

        journal.bind("CIVILIZATION_ROME", "12345").unwrap();
        assert_eq!(journal.pending_len(), 0);

        let path = dir.path().join("diary_CIVILIZATION_ROME_12345.jsonl");
        assert_eq!(journal.path().unwrap(), path);
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert_eq!(entries[0].turn, Some(3));
        assert_eq!(entries[0].fields["entry"], "a");
        assert_eq!(entries[1].game, "CIVILIZATION_ROME_12345");
        assert_eq!(entries[1].session, "sess-1");
    }

    /// A path that opens for reading but refuses appends.
    #[cfg(target_os = "linux")]
    fn unwritable(path: &Path) {
        std::os::unix::fs::symlink("/proc/self/status", path).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_flush_keeps_queued_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diary_C_1.jsonl");
        unwritable(&path);

        let journal = GameJournal::new(JournalKind::Diary, dir.path(), "s");
        for i in 0..3 {
            journal.record(fields(json!({"entry": i}))).unwrap();
        }
        assert!(journal.bind("C", "1").is_err());
        assert_eq!(journal.pending_len(), 3);
        assert!(!journal.is_bound());

        fs::remove_file(&path).unwrap();
        journal.bind("C", "1").unwrap();
        assert_eq!(journal.pending_len(), 0);
        let entries = read_entries(&path).unwrap();
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(entries[2].fields["entry"], 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_append_leaves_no_sequence_gap() {
        let dir = tempdir().unwrap();
        let journal = GameJournal::new(JournalKind::Log, dir.path(), "s");
        journal.bind("C", "1").unwrap();
        assert_eq!(journal.record(fields(json!({"n": 0}))).unwrap(), Some(0));

        let path = journal.path().unwrap();
        let kept = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        unwritable(&path);
        assert!(journal.record(fields(json!({"n": 1}))).is_err());

        fs::remove_file(&path).unwrap();
        fs::write(&path, kept).unwrap();
        assert_eq!(journal.record(fields(json!({"n": 2}))).unwrap(), Some(1));
        let seqs: Vec<u64> = read_entries(&path).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_bind_continues_existing_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log_CIVILIZATION_KOREA_7.jsonl");
        {
            let earlier = GameJournal::new(JournalKind::Log, dir.path(), "old");
            earlier.bind("CIVILIZATION_KOREA", "7").unwrap();
            for i in 0..3 {
                earlier.record(fields(json!({"i": i}))).unwrap();
            }
        }

        let journal = GameJournal::new(JournalKind::Log, dir.path(), "new");
        for i in 0..2 {
            journal.record(fields(json!({"late": i}))).unwrap();
        }
        journal.bind("CIVILIZATION_KOREA", "7").unwrap();
        let seq = journal.record(fields(json!({"after": true}))).unwrap();
        assert_eq!(seq, Some(5));

        let seqs: Vec<u64> = read_entries(&path).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_bind_twice_is_noop() {
        let dir = tempdir().unwrap();
        let journal = GameJournal::new(JournalKind::Spatial, dir.path(), "s");
        journal.record(fields(json!({"x": 1}))).unwrap();
        journal.bind("CIVILIZATION_EGYPT", "99").unwrap();
        journal.bind("CIVILIZATION_EGYPT", "99").unwrap();

        let path = journal.path().unwrap();
        assert_eq!(read_entries(&path).unwrap().len(), 1);
        assert_eq!(journal.record(fields(json!({"x": 2}))).unwrap(), Some(1));
    }

    #[test]
    fn test_rebind_to_other_game_switches_file() {
        let dir = tempdir().unwrap();
        let journal = GameJournal::new(JournalKind::Diary, dir.path(), "s");
        journal.bind("CIVILIZATION_A", "1").unwrap();
        journal.record(fields(json!({"n": 1}))).unwrap();
        journal.bind("CIVILIZATION_B", "2").unwrap();
        assert_eq!(journal.record(fields(json!({"n": 2}))).unwrap(), Some(0));
        assert!(dir.path().join("diary_CIVILIZATION_B_2.jsonl").exists());
    }

    #[test]
    fn test_reserved_keys_are_dropped() {
        let dir = tempdir().unwrap();
        let journal = GameJournal::new(JournalKind::Log, dir.path(), "s");
        journal.bind("C", "1").unwrap();
        journal.set_turn(9);
        journal
            .record(fields(json!({"seq": 1000, "turn": 1, "tool": "end_turn"})))
            .unwrap();

        let entries = read_entries(&journal.path().unwrap()).unwrap();
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[0].turn, Some(9));
        assert_eq!(entries[0].fields.len(), 1);
    }

    #[test]
    fn test_game_id_sanitizes() {
        assert_eq!(game_id("CIVILIZATION_ROME", "-42"), "CIVILIZATION_ROME_-42");
        assert_eq!(game_id("a/b", "1 2"), "a_b_1_2");
        assert_eq!(JournalKind::MapTurns.file_name("X", "1"), "mapturns_X_1.jsonl");
    }
}
