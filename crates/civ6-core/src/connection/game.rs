//! Game connection: one tuner socket shared by every caller.
//!
//! Requests are serialized by a single async mutex. Each request pre-drains
//! stale output, sends `CMD:<state>:<script>`, collects output lines until the
//! sentinel, then post-drains. A transport failure reconnects under the same
//! lock and retries once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::StateRegistry;
use crate::config::ConnectionOptions;
use crate::error::{GameError, Result};
use crate::tuner::{self, tag, TunerReader, TunerWriter};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

struct Link {
    reader: TunerReader,
    writer: TunerWriter,
}

#[derive(Default)]
struct Inner {
    link: Option<Link>,
    registry: StateRegistry,
    identity: Option<String>,
}

/// Which scripting state a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTarget {
    Query,
    Command,
    Index(i32),
}

pub struct GameConnection {
    options: ConnectionOptions,
    inner: Mutex<Inner>,
    connected: AtomicBool,
    handshakes: AtomicU64,
}

impl GameConnection {
    /// Create a disconnected connection. Nothing touches the network until
    /// the first request or an explicit [`GameConnection::connect`].
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(false),
            handshakes: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Completed handshakes since creation (first connect included).
    pub fn handshake_count(&self) -> u64 {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.establish(&mut inner).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.establish(&mut inner).await
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.link.is_some() {
            info!("Disconnecting from tuner");
        }
        self.drop_link(&mut inner);
    }

    pub async fn identity(&self) -> Option<String> {
        self.inner.lock().await.identity.clone()
    }

    pub async fn states(&self) -> StateRegistry {
        self.inner.lock().await.registry.clone()
    }

    pub async fn query_state_index(&self) -> Option<i32> {
        self.inner.lock().await.registry.query_index
    }

    pub async fn command_state_index(&self) -> Option<i32> {
        self.inner.lock().await.registry.command_index
    }

    /// Run a read-only script in the query state.
    pub async fn execute_read(&self, script: &str, timeout: Duration) -> Result<Vec<String>> {
        self.submit(StateTarget::Query, script, timeout).await
    }

    /// Run a mutating script in the command state.
    pub async fn execute_write(&self, script: &str, timeout: Duration) -> Result<Vec<String>> {
        self.submit(StateTarget::Command, script, timeout).await
    }

    pub async fn execute_in(
        &self,
        state_index: i32,
        script: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        self.submit(StateTarget::Index(state_index), script, timeout).await
    }

    pub async fn submit(
        &self,
        target: StateTarget,
        script: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let index = self.ensure_ready(&mut inner, target).await?;

        match self.exchange(&mut inner, index, script, timeout).await {
            Err(e) if e.is_transport() => {
                warn!(error = %e, state = index, "Tuner request failed, reconnecting once");
                self.establish(&mut inner).await?;
                let index = self.resolve(&inner, target)?;
                self.exchange(&mut inner, index, script, timeout)
                    .await
                    .map_err(|e| match e {
                        GameError::Disconnected(_) => e,
                        e if e.is_transport() => GameError::Disconnected(e.to_string()),
                        e => e,
                    })
            }
            other => other,
        }
    }

    /// Make sure a live link exists and the target state is known.
    async fn ensure_ready(&self, inner: &mut Inner, target: StateTarget) -> Result<i32> {
        if inner.link.is_none() {
            self.establish(inner).await?;
        }
        match self.resolve(inner, target) {
            Ok(index) => Ok(index),
            Err(GameError::NotInGame { state }) => {
                // Game states are only advertised once a game is loaded.
                debug!(%state, "Required state missing, re-handshaking");
                self.establish(inner).await?;
                self.resolve(inner, target)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve(&self, inner: &Inner, target: StateTarget) -> Result<i32> {
        match target {
            StateTarget::Index(index) => Ok(index),
            StateTarget::Query => inner.registry.query_index.ok_or_else(|| GameError::NotInGame {
                state: self.options.query_state.clone(),
            }),
            StateTarget::Command => {
                inner
                    .registry
                    .command_index
                    .ok_or_else(|| GameError::NotInGame {
                        state: self.options.command_state.clone(),
                    })
            }
        }
    }

    async fn establish(&self, inner: &mut Inner) -> Result<()> {
        self.drop_link(inner);

        let (mut reader, writer) = tuner::connect(
            &self.options.host,
            self.options.port,
            self.options.connect_timeout,
            self.options.max_frame_bytes,
        )
        .await?;
        let hs = tuner::handshake(&mut reader, self.options.handshake_timeout).await?;
        let registry = StateRegistry::parse(
            &hs.raw_states,
            &self.options.query_state,
            &self.options.command_state,
        );

        info!(
            identity = %hs.identity,
            states = registry.states.len(),
            in_game = registry.in_game(),
            query = ?registry.query_index,
            command = ?registry.command_index,
            "Tuner handshake complete"
        );

        inner.link = Some(Link { reader, writer });
        inner.registry = registry;
        inner.identity = Some(hs.identity);
        self.connected.store(true, Ordering::SeqCst);
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drop_link(&self, inner: &mut Inner) {
        inner.link = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn exchange(
        &self,
        inner: &mut Inner,
        index: i32,
        script: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let Some(link) = inner.link.as_mut() else {
            return Err(GameError::Disconnected("not connected".to_string()));
        };

        let outcome = self.round_trip(link, index, script, timeout).await;
        if matches!(&outcome, Err(e) if e.is_transport()) {
            self.drop_link(inner);
            return outcome;
        }

        // The response is complete at this point; a dead socket here only
        // means the next request has to reconnect.
        match tuner::drain(&mut link.reader, self.options.post_drain).await {
            Ok(frames) if !frames.is_empty() => {
                debug!(count = frames.len(), "Discarded trailing frames");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Socket closed during post-drain");
                self.drop_link(inner);
            }
        }
        outcome
    }

    async fn round_trip(
        &self,
        link: &mut Link,
        index: i32,
        script: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let stale = tuner::drain(&mut link.reader, self.options.pre_drain).await?;
        if !stale.is_empty() {
            debug!(count = stale.len(), "Discarded stale frames before request");
        }

        let request = format!("CMD:{}:{}", index, script);
        tuner::send_frame(&mut link.writer, tag::COMMAND, request.as_bytes()).await?;

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(state = index, lines = lines.len(), "Request deadline reached, returning partial output");
                break;
            }
            let wait = remaining.min(self.options.frame_wait);
            let Some(frame) = tuner::recv_frame(&mut link.reader, wait).await? else {
                debug!(state = index, lines = lines.len(), "No frame before wait elapsed");
                break;
            };
            if frame.is_error() {
                return Err(GameError::ScriptError(frame.text()));
            }
            match frame.output_value() {
                Some(value) if value == self.options.sentinel => break,
                Some(value) => lines.push(value),
                None => {}
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_options, FakeTuner, GAME_STATES};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_handshake_discovers_states() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.send(tag::INFO, "APP:HOST/1.0").await;
            c.send(tag::INFO, "LSQ:0:GameCore_Tuner:1:InGame").await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.query_state_index().await, Some(0));
        assert_eq!(conn.command_state_index().await, Some(1));
        assert_eq!(conn.identity().await.as_deref(), Some("APP:HOST/1.0"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_happy_path_stops_at_sentinel() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet(GAME_STATES).await;
            let (index, script) = c.next_command().await.unwrap();
            c.output("GameCore_Tuner", "A").await;
            c.output("GameCore_Tuner", "B").await;
            c.output("GameCore_Tuner", "---END---").await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            (index, script)
        });

        let script = r#"print("A"); print("B"); print("---END---")"#;
        let lines = conn.execute_read(script, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["A", "B"]);

        let (index, seen) = server.await.unwrap();
        assert_eq!(index, 0);
        assert_eq!(seen, script);
    }

    #[tokio::test]
    async fn test_write_goes_to_command_state() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet("LSQ:0:Main:3:GameCore_Tuner:8:InGame").await;
            let (index, _) = c.next_command().await.unwrap();
            c.reply(&["ok"]).await;
            index
        });

        let lines = conn.execute_write("x()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["ok"]);
        assert_eq!(server.await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_execute_in_explicit_state() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet("LSQ:0:Main State").await;
            let (index, _) = c.next_command().await.unwrap();
            c.reply(&["front end"]).await;
            index
        });

        let lines = conn.execute_in(0, "y()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["front end"]);
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_script_error_surfaces_payload() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet(GAME_STATES).await;
            c.next_command().await.unwrap();
            c.send(tag::ERROR, "ERR:BAD_CALL").await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let err = conn.execute_read("bad()", DEFAULT_TIMEOUT).await.unwrap_err();
        assert_eq!(err.script_payload(), Some("ERR:BAD_CALL"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_mid_request_death_reconnects_once() {
        let tuner = FakeTuner::bind().await;
        let accepted = Arc::clone(&tuner.accepted);
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut first = tuner.accept().await;
            first.greet(GAME_STATES).await;
            first.next_command().await.unwrap();
            first.output("GameCore_Tuner", "partial").await;
            drop(first);

            let mut second = tuner.accept().await;
            second.greet(GAME_STATES).await;
            let (_, script) = second.next_command().await.unwrap();
            second.reply(&["X"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            script
        });

        let lines = conn.execute_read("probe()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["X"]);
        assert_eq!(server.await.unwrap(), "probe()");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(conn.handshake_count(), 2);
    }

    #[tokio::test]
    async fn test_truncated_header_reconnects_once() {
        let tuner = FakeTuner::bind().await;
        let accepted = Arc::clone(&tuner.accepted);
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut first = tuner.accept().await;
            first.greet(GAME_STATES).await;
            first.next_command().await.unwrap();
            // Half a length prefix, then the socket goes away.
            first.send_raw(&[0x10, 0x00]).await;
            drop(first);

            let mut second = tuner.accept().await;
            second.greet(GAME_STATES).await;
            second.next_command().await.unwrap();
            second.reply(&["after truncation"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let lines = conn.execute_read("units()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["after truncation"]);
        server.await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(conn.handshake_count(), 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_reconnects_once() {
        let tuner = FakeTuner::bind().await;
        let accepted = Arc::clone(&tuner.accepted);
        let mut options = fast_options(tuner.port());
        options.max_frame_bytes = 64;
        let conn = GameConnection::new(options);
        let server = tokio::spawn(async move {
            let mut first = tuner.accept().await;
            first.greet(GAME_STATES).await;
            first.next_command().await.unwrap();
            let mut header = 1000u32.to_le_bytes().to_vec();
            header.push(tag::OUTPUT);
            first.send_raw(&header).await;

            let mut second = tuner.accept().await;
            second.greet(GAME_STATES).await;
            second.next_command().await.unwrap();
            second.reply(&["small"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(first);
        });

        let lines = conn.execute_read("units()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["small"]);
        server.await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_failure_propagates_disconnected() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let mut c = tuner.accept().await;
                c.greet(GAME_STATES).await;
                c.next_command().await.unwrap();
                drop(c);
            }
        });

        let err = conn.execute_read("probe()", DEFAULT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, GameError::Disconnected(_)), "got {err:?}");
        assert!(!conn.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_game_raises_not_in_game_after_one_retry() {
        let tuner = FakeTuner::bind().await;
        let accepted = Arc::clone(&tuner.accepted);
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            for _ in 0..2 {
                let mut c = tuner.accept().await;
                c.greet("LSQ:0:Main State:1:FrontEnd").await;
                held.push(c);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let err = conn.execute_read("x()", DEFAULT_TIMEOUT).await.unwrap_err();
        match err {
            GameError::NotInGame { state } => assert_eq!(state, "GameCore_Tuner"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_game_loaded_between_handshakes() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut menu = tuner.accept().await;
            menu.greet("LSQ:0:Main State").await;
            let mut game = tuner.accept().await;
            game.greet(GAME_STATES).await;
            game.next_command().await.unwrap();
            game.reply(&["turn 1"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(menu);
        });

        let lines = conn.execute_read("turn()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["turn 1"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_lines() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet(GAME_STATES).await;
            c.next_command().await.unwrap();
            c.output("GameCore_Tuner", "A").await;
            tokio::time::sleep(Duration::from_millis(600)).await;
        });

        let started = Instant::now();
        let lines = conn
            .execute_read("slow()", Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(lines, vec!["A"]);
        assert!(started.elapsed() < Duration::from_millis(550));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_pre_drain_absorbs_unsolicited_output() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet(GAME_STATES).await;
            c.next_command().await.unwrap();
            c.reply(&["first"]).await;
            tokio::time::sleep(Duration::from_millis(60)).await;
            c.output("InGame", "unit moved").await;
            c.next_command().await.unwrap();
            c.reply(&["second"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert_eq!(conn.execute_read("a()", DEFAULT_TIMEOUT).await.unwrap(), vec!["first"]);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(conn.execute_read("b()", DEFAULT_TIMEOUT).await.unwrap(), vec!["second"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_interleave() {
        let tuner = FakeTuner::bind().await;
        let overlap = Arc::new(AtomicBool::new(false));
        let seen_overlap = Arc::clone(&overlap);
        let conn = Arc::new(GameConnection::new(fast_options(tuner.port())));

        let server = tokio::spawn(async move {
            let mut c = tuner.accept().await;
            c.greet(GAME_STATES).await;
            let mut order = Vec::new();
            for _ in 0..2 {
                let (_, script) = c.next_command().await.unwrap();
                // Nothing else may arrive while this request is outstanding.
                if c.try_command(Duration::from_millis(150)).await.is_some() {
                    seen_overlap.store(true, Ordering::SeqCst);
                }
                c.reply(&[script.as_str()]).await;
                order.push(script);
            }
            order
        });

        let a = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.execute_read("one", DEFAULT_TIMEOUT).await })
        };
        let b = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.execute_read("two", DEFAULT_TIMEOUT).await })
        };

        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        assert_eq!(ra, vec!["one"]);
        assert_eq!(rb, vec!["two"]);
        assert!(!overlap.load(Ordering::SeqCst));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_when_nothing_listens() {
        let tuner = FakeTuner::bind().await;
        let port = tuner.port();
        drop(tuner);

        let conn = GameConnection::new(fast_options(port));
        let err = conn.execute_read("x()", DEFAULT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, GameError::Unreachable { .. }));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_then_lazy_reconnect() {
        let tuner = FakeTuner::bind().await;
        let conn = GameConnection::new(fast_options(tuner.port()));
        let server = tokio::spawn(async move {
            let mut first = tuner.accept().await;
            first.greet(GAME_STATES).await;
            let mut second = tuner.accept().await;
            second.greet(GAME_STATES).await;
            second.next_command().await.unwrap();
            second.reply(&["again"]).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(first);
        });

        conn.connect().await.unwrap();
        conn.disconnect().await;
        assert!(!conn.is_connected());

        let lines = conn.execute_read("z()", DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(lines, vec!["again"]);
        assert!(conn.is_connected());
        server.await.unwrap();
    }
}
