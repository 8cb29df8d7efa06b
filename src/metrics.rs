//! Prometheus metrics collection for perchd.
//!
//! Tracks stanza throughput, presence fan-out size, handler errors, and
//! live session counts. Exposed through the HTTP endpoint in
//! [`crate::http`].

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Stanzas processed by kind (available, subscribe, roster-set, ...).
pub static STANZA_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

/// Handler errors by stanza kind and error code.
pub static STANZA_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Roster pushes delivered to owner sessions.
pub static ROSTER_PUSHES: OnceLock<IntCounterVec> = OnceLock::new();

/// Directed presence entries created/removed.
pub static DIRECTED_EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Currently bound client sessions.
pub static BOUND_SESSIONS: OnceLock<IntGauge> = OnceLock::new();

/// Rosters currently resident in memory.
pub static RESIDENT_ROSTERS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Recipients per presence broadcast.
pub static PRESENCE_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Stanza processing latency by kind.
pub static STANZA_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(STANZA_COUNTER, IntCounterVec::new(Opts::new("perchd_stanza_total", "Stanzas processed by kind"), &["kind"]));
    register!(STANZA_ERRORS, IntCounterVec::new(Opts::new("perchd_stanza_errors_total", "Handler errors by stanza kind and error code"), &["kind", "error"]));
    register!(ROSTER_PUSHES, IntCounterVec::new(Opts::new("perchd_roster_pushes_total", "Roster pushes by trigger"), &["trigger"]));
    register!(DIRECTED_EVENTS, IntCounterVec::new(Opts::new("perchd_directed_presence_events_total", "Directed presence registry events"), &["event"]));
    register!(BOUND_SESSIONS, IntGauge::new("perchd_bound_sessions", "Currently bound client sessions"));
    register!(RESIDENT_ROSTERS, IntGauge::new("perchd_resident_rosters", "Rosters resident in memory"));
    register!(PRESENCE_FANOUT, Histogram::with_opts(
        HistogramOpts::new("perchd_presence_fanout", "Recipients per presence broadcast")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0])));
    register!(STANZA_LATENCY, HistogramVec::new(
        HistogramOpts::new("perchd_stanza_duration_seconds", "Stanza processing latency by kind")
            .buckets(vec![0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        &["kind"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ========================================================================
// Helper functions
// ========================================================================

/// Record a stanza execution with latency.
#[inline]
pub fn record_stanza(kind: &str, duration_secs: f64) {
    if let Some(c) = STANZA_COUNTER.get() {
        c.with_label_values(&[kind]).inc();
    }
    if let Some(h) = STANZA_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}

/// Record a handler error.
#[inline]
pub fn record_stanza_error(kind: &str, error: &str) {
    if let Some(c) = STANZA_ERRORS.get() {
        c.with_label_values(&[kind, error]).inc();
    }
}

/// Record a roster push, labeled by what triggered it.
#[inline]
pub fn record_roster_push(trigger: &str) {
    if let Some(c) = ROSTER_PUSHES.get() {
        c.with_label_values(&[trigger]).inc();
    }
}

/// Record a directed presence registry event.
#[inline]
pub fn record_directed_event(event: &str) {
    if let Some(c) = DIRECTED_EVENTS.get() {
        c.with_label_values(&[event]).inc();
    }
}

/// Record presence broadcast fan-out.
#[inline]
pub fn record_fanout(recipients: usize) {
    if let Some(h) = PRESENCE_FANOUT.get() {
        h.observe(recipients as f64);
    }
}

#[inline]
pub fn inc_sessions() {
    if let Some(g) = BOUND_SESSIONS.get() {
        g.inc();
    }
}

#[inline]
pub fn dec_sessions() {
    if let Some(g) = BOUND_SESSIONS.get() {
        g.dec();
    }
}

#[inline]
pub fn set_resident_rosters(count: i64) {
    if let Some(g) = RESIDENT_ROSTERS.get() {
        g.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();

        record_stanza("subscribe", 0.001);
        record_fanout(3);

        let output = gather_metrics();
        assert!(output.contains("perchd_stanza_total"));
    }
}
