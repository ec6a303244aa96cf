//! Core configuration.
//!
//! The only environment variable the core reads is `CIV6_MCP_HOME`. Host and
//! port overrides belong to the binary.

use std::path::PathBuf;
use std::time::Duration;

use crate::tuner::DEFAULT_MAX_FRAME_BYTES;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4318;
pub const QUERY_STATE: &str = "GameCore_Tuner";
pub const COMMAND_STATE: &str = "InGame";
pub const SENTINEL: &str = "---END---";
pub const HOME_ENV: &str = "CIV6_MCP_HOME";

/// Journal directory: `$CIV6_MCP_HOME`, else `~/.civ6-mcp`.
pub fn default_home() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".civ6-mcp"))
        .unwrap_or_else(|| PathBuf::from(".civ6-mcp"))
}

/// Tuner connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub query_state: String,
    pub command_state: String,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Quiet window used to discard stale frames before a request.
    pub pre_drain: Duration,
    /// Quiet window used to discard trailing output after a request.
    pub post_drain: Duration,
    /// Longest single wait for the next response frame.
    pub frame_wait: Duration,
    pub max_frame_bytes: usize,
    pub sentinel: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            query_state: QUERY_STATE.to_string(),
            command_state: COMMAND_STATE.to_string(),
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
            pre_drain: Duration::from_millis(100),
            post_drain: Duration::from_millis(200),
            frame_wait: Duration::from_secs(2),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            sentinel: SENTINEL.to_string(),
        }
    }
}

impl ConnectionOptions {
    pub fn with_addr(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

/// Everything the session services need at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub home: PathBuf,
    pub connection: ConnectionOptions,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            connection: ConnectionOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ConnectionOptions::default();
        assert_eq!(opts.host, "127.0.0.1");
        assert_eq!(opts.port, 4318);
        assert_eq!(opts.pre_drain, Duration::from_millis(100));
        assert_eq!(opts.post_drain, Duration::from_millis(200));
        assert_eq!(opts.sentinel, "---END---");
    }

    #[test]
    fn test_with_addr_keeps_defaults() {
        let opts = ConnectionOptions::with_addr("10.0.0.2", 5000);
        assert_eq!(opts.port, 5000);
        assert_eq!(opts.query_state, QUERY_STATE);
        assert_eq!(opts.command_state, COMMAND_STATE);
    }
}
