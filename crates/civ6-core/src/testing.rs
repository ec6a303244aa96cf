//! In-process fake tuner server for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use crate::config::ConnectionOptions;
use crate::tuner::{self, tag, FrameReader};

pub const GAME_STATES: &str = "LSQ:0:GameCore_Tuner:1:InGame";

/// One accepted client connection, seen from the server side.
pub struct ServerConn {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl ServerConn {
    pub async fn send(&mut self, tag: u8, text: &str) {
        tuner::send_frame(&mut self.writer, tag, text.as_bytes())
            .await
            .expect("server send");
    }

    /// Bytes straight onto the socket, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("server send");
        self.writer.flush().await.expect("server flush");
    }

    pub async fn greet(&mut self, states: &str) {
        self.send(tag::INFO, "APP:HOST/1.0").await;
        self.send(tag::INFO, states).await;
    }

    pub async fn output(&mut self, context: &str, value: &str) {
        let payload = tuner::output_payload(context, value);
        tuner::send_frame(&mut self.writer, tag::OUTPUT, &payload)
            .await
            .expect("server send");
    }

    /// Reply with the given lines followed by the sentinel.
    pub async fn reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.output("GameCore_Tuner", line).await;
        }
        self.output("GameCore_Tuner", "---END---").await;
    }

    /// Next `CMD:<idx>:<script>` request, split into index and script.
    pub async fn next_command(&mut self) -> Option<(i32, String)> {
        let frame = self.reader.read_frame().await.ok()?;
        let text = frame.text();
        let rest = text.strip_prefix("CMD:")?;
        let (index, script) = rest.split_once(':')?;
        Some((index.parse().ok()?, script.to_string()))
    }

    /// Like `next_command` but gives up after `wait`.
    pub async fn try_command(&mut self, wait: Duration) -> Option<(i32, String)> {
        tokio::time::timeout(wait, self.next_command()).await.ok().flatten()
    }
}

/// Bound listener plus a counter of accepted connections.
pub struct FakeTuner {
    listener: TcpListener,
    pub accepted: Arc<AtomicUsize>,
}

impl FakeTuner {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        Self {
            listener,
            accepted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("local addr").port()
    }

    pub async fn accept(&self) -> ServerConn {
        let (stream, _) = self.listener.accept().await.expect("accept");
        self.accepted.fetch_add(1, Ordering::SeqCst);
        let (read_half, write_half) = stream.into_split();
        ServerConn {
            reader: FrameReader::new(read_half, 1024 * 1024),
            writer: write_half,
        }
    }
}

/// Connection options pointing at a fake tuner, with short drain windows.
pub fn fast_options(port: u16) -> ConnectionOptions {
    ConnectionOptions {
        pre_drain: Duration::from_millis(20),
        post_drain: Duration::from_millis(30),
        frame_wait: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(1),
        ..ConnectionOptions::with_addr("127.0.0.1", port)
    }
}

/// Serve every command with a fixed handler, accepting reconnects. A returned
/// line starting with `ERR:` is sent as an error frame instead of output.
pub async fn serve_forever<F>(tuner: FakeTuner, mut handler: F)
where
    F: FnMut(i32, &str) -> Vec<String> + Send + 'static,
{
    loop {
        let mut conn = tuner.accept().await;
        conn.greet(GAME_STATES).await;
        while let Some((index, script)) = conn.next_command().await {
            let lines = handler(index, &script);
            if let Some(err) = lines.iter().find(|l| l.starts_with("ERR:")) {
                conn.send(tag::ERROR, err).await;
                continue;
            }
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            conn.reply(&refs).await;
        }
    }
}
