//! Per-process session: the connection plus every service bound on top of it.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::connection::GameConnection;
use crate::journal::{Diary, GameJournal, ToolCallLog};
use crate::mapcap::MapCapture;
use crate::spatial::SpatialTracker;
use crate::spectator::{Spectator, SpectatorTiming};

/// Game identity once known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameIdentity {
    pub civ: String,
    pub seed: String,
}

pub struct GameSession {
    config: CoreConfig,
    session_id: String,
    conn: Arc<GameConnection>,
    diary: Diary,
    tool_log: ToolCallLog,
    spatial: SpatialTracker,
    mapcap: MapCapture,
    spectator: Spectator,
    game: Mutex<Option<GameIdentity>>,
}

impl GameSession {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_timing(config, SpectatorTiming::default())
    }

    pub fn with_timing(config: CoreConfig, timing: SpectatorTiming) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let home = config.home.clone();
        let conn = Arc::new(GameConnection::new(config.connection.clone()));
        info!(session = %session_id, home = %home.display(), "Game session created");
        Self {
            diary: Diary::new(&home, &session_id),
            tool_log: ToolCallLog::new(&home, &session_id),
            spatial: SpatialTracker::new(&home, &session_id),
            mapcap: MapCapture::new(&home, &session_id),
            spectator: Spectator::new(conn.clone(), timing),
            conn,
            session_id,
            config,
            game: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection(&self) -> &Arc<GameConnection> {
        &self.conn
    }

    pub fn diary(&self) -> &Diary {
        &self.diary
    }

    pub fn tool_log(&self) -> &ToolCallLog {
        &self.tool_log
    }

    pub fn spatial(&self) -> &SpatialTracker {
        &self.spatial
    }

    pub fn mapcap(&self) -> &MapCapture {
        &self.mapcap
    }

    pub fn spectator(&self) -> &Spectator {
        &self.spectator
    }

    pub fn game(&self) -> Option<GameIdentity> {
        self.game
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn journals(&self) -> [&GameJournal; 4] {
        [
            self.diary.journal(),
            self.tool_log.journal(),
            self.spatial.journal(),
            self.mapcap.journal(),
        ]
    }

    /// Bind every journal to the game. Repeated calls with the same identity
    /// are no-ops.
    pub fn bind_game(&self, civ: &str, seed: &str) -> Result<()> {
        let identity = GameIdentity {
            civ: civ.to_string(),
            seed: seed.to_string(),
        };
        if self.game().as_ref() == Some(&identity) {
            return Ok(());
        }
        for journal in [self.diary.journal(), self.tool_log.journal(), self.spatial.journal()] {
            journal.bind(civ, seed)?;
        }
        self.mapcap.bind(civ, seed)?;
        info!(civ, seed, "Session bound to game");
        *self.game.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(identity);
        Ok(())
    }

    pub fn set_turn(&self, turn: u32) {
        for journal in self.journals() {
            journal.set_turn(turn);
        }
    }

    pub fn turn(&self) -> Option<u32> {
        self.tool_log.journal().turn()
    }

    /// Stop background loops and close the socket.
    pub async fn shutdown(&self) {
        self.spectator.stop().await;
        self.conn.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionOptions;
    use tempfile::tempdir;

    fn session_in(dir: &std::path::Path) -> GameSession {
        GameSession::new(CoreConfig {
            home: dir.to_path_buf(),
            connection: ConnectionOptions::with_addr("127.0.0.1", 1),
        })
    }

    #[test]
    fn test_bind_and_turn_reach_every_journal() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        assert!(session.game().is_none());

        session.set_turn(7);
        session.bind_game("CIVILIZATION_ROME", "42").unwrap();
        session.bind_game("CIVILIZATION_ROME", "42").unwrap();

        for journal in session.journals() {
            assert!(journal.is_bound());
            assert_eq!(journal.turn(), Some(7));
            assert_eq!(journal.session(), session.session_id());
        }
        assert_eq!(session.turn(), Some(7));
        assert_eq!(session.game().unwrap().seed, "42");
        assert!(session
            .diary()
            .journal()
            .path()
            .unwrap()
            .ends_with("diary_CIVILIZATION_ROME_42.jsonl"));
    }

    #[tokio::test]
    async fn test_shutdown_without_connection() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        session.shutdown().await;
        assert!(!session.connection().is_connected());
    }
}
