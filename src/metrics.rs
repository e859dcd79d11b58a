//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Notification throughput by origin and kind
//! - Echo suppression and benign race drops
//! - Outbound sends and remote applies
//! - Shutdown discards
//! - Peer liveness probes
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `bisync_` and follow Prometheus conventions:
//! counters end in `_total`, gauges represent current state, histograms track
//! distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the engine lifecycle state as a labelled gauge.
pub fn set_engine_state(state: &str) {
    gauge!("bisync_engine_state", "state" => state.to_string()).set(1.0);
}

/// Record one notification entering the dispatch loop.
pub fn record_change(origin: &'static str, kind: &'static str) {
    counter!("bisync_changes_total", "origin" => origin, "kind" => kind).increment(1);
}

/// Record a log-only status message.
pub fn record_status() {
    counter!("bisync_status_messages_total").increment(1);
}

/// Record a local change suppressed because the peer already has it.
pub fn record_suppressed(kind: &'static str) {
    counter!("bisync_suppressed_total", "kind" => kind).increment(1);
}

/// Record a notification dropped on a benign missing-path race.
pub fn record_race_drop(kind: &'static str) {
    counter!("bisync_race_drops_total", "kind" => kind).increment(1);
}

/// Record a notification delivered to the peer.
pub fn record_sent(kind: &'static str) {
    counter!("bisync_sent_total", "kind" => kind).increment(1);
}

/// Record a remote notification applied to local disk.
pub fn record_applied(kind: &'static str) {
    counter!("bisync_applied_total", "kind" => kind).increment(1);
}

/// Record a queued notification abandoned by shutdown.
pub fn record_discarded() {
    counter!("bisync_discarded_total").increment(1);
}

/// Record a liveness probe outcome and its round-trip latency.
pub fn record_peer_ping(success: bool, latency: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("bisync_peer_pings_total", "status" => status).increment(1);
    histogram!("bisync_peer_ping_duration_seconds").record(latency.as_secs_f64());
}
