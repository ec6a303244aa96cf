//! Game connection
//!
//! - `GameConnection`: request serialization, state discovery, reconnects
//! - `StateRegistry`: the `index -> name` scripting state table

mod game;
mod registry;

pub use game::{GameConnection, StateTarget, DEFAULT_TIMEOUT};
pub use registry::StateRegistry;
