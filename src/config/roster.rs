//! Roster and presence behavior toggles.

use serde::Deserialize;

/// Roster subsystem configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// Honor client-supplied roster versions: a `get` carrying the
    /// current version gets an empty acknowledgement instead of the full
    /// roster (default: true).
    #[serde(default = "default_true")]
    pub versioning: bool,

    /// Flood queued offline messages to a session on its first available
    /// presence (default: true).
    #[serde(default = "default_true")]
    pub offline_flood: bool,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            versioning: true,
            offline_flood: true,
        }
    }
}

fn default_true() -> bool {
    true
}
