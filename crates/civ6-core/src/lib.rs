//! civ6-core: tuner protocol, game connection and session services.
//!
//! - [`tuner`]: frame codec and raw socket helpers
//! - [`connection`]: the shared, self-healing [`GameConnection`]
//! - [`journal`], [`spatial`], [`mapcap`]: per-game JSONL observation files
//! - [`spectator`]: camera hopper and popup watcher
//! - [`tools`]: tool-call dispatcher on top of a [`GameSession`]

pub mod config;
pub mod connection;
pub mod error;
pub mod journal;
pub mod mapcap;
pub mod session;
pub mod spatial;
pub mod spectator;
pub mod tools;
pub mod tuner;

#[cfg(test)]
mod testing;

pub use config::{default_home, ConnectionOptions, CoreConfig};
pub use connection::{GameConnection, StateRegistry, StateTarget, DEFAULT_TIMEOUT};
pub use error::{GameError, Result};
pub use session::{GameIdentity, GameSession};
pub use spectator::{Spectator, SpectatorTiming};
pub use tools::{ToolDispatcher, ToolOutput, TOOL_NAMES};
