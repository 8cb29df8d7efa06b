//! Configuration loading and management.
//!
//! Split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig)
//! - [`roster`]: Roster and presence behavior toggles (RosterConfig)

mod roster;
mod types;

pub use roster::RosterConfig;
pub use types::{Config, ConfigError, ServerConfig};
