//! Telemetry utilities for stanza timing and span construction.

use std::time::Instant;

/// Guard for timing stanza processing.
///
/// Records latency when dropped, so early returns in handlers still get
/// measured.
pub struct StanzaTimer {
    kind: String,
    start: Instant,
}

impl StanzaTimer {
    /// Start timing a stanza of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for StanzaTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_stanza(&self.kind, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for a client session's lifetime.
    pub fn session(address: &str) -> Span {
        info_span!("session", address = %address)
    }

    /// Span for a single stanza's processing.
    pub fn stanza(kind: &str, from: &str) -> Span {
        info_span!("stanza", kind = %kind, from = %from)
    }
}
