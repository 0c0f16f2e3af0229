//! Metrics instrumentation for crossdns.
//!
//! All metrics are prefixed with `crossdns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::Empty => "empty",
        QueryResult::Declined => "declined",
        QueryResult::NotReady => "not_ready",
        QueryResult::ServFail => "servfail",
    };

    counter!("crossdns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("crossdns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// A record was returned.
    Answered,
    /// Authoritative answer without records.
    Empty,
    /// Passed to the next handler.
    Declined,
    /// Index not ready (initial sync incomplete).
    NotReady,
    /// Server failure returned.
    ServFail,
}

/// Record a specification change handled by the sync coordinator.
pub fn record_spec_event(event_type: SpecEventType) {
    let event_str = match event_type {
        SpecEventType::Add => "add",
        SpecEventType::Update => "update",
        SpecEventType::Delete => "delete",
        SpecEventType::Unscheduled => "unscheduled",
        SpecEventType::Ignored => "ignored",
        SpecEventType::Synced => "synced",
    };

    counter!("crossdns.sync.event.count", "event" => event_str).increment(1);
}

/// Specification event types.
#[derive(Debug, Clone, Copy)]
pub enum SpecEventType {
    /// Spec added to the index.
    Add,
    /// Spec keys replaced.
    Update,
    /// Spec removed on deletion.
    Delete,
    /// Spec removed after leaving the scheduled phase.
    Unscheduled,
    /// Event filtered out.
    Ignored,
    /// Listing complete, live streaming starts.
    Synced,
}

/// Record a watch (re)connect.
pub fn record_watch_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::Error => "error",
        ReconnectReason::InitialConnect => "initial_connect",
    };

    counter!("crossdns.sync.reconnect.count", "reason" => reason_str).increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectReason {
    /// Watch stream ended normally.
    StreamEnded,
    /// Watch failed or reported an error.
    Error,
    /// First connection to the cluster-state source.
    InitialConnect,
}

/// Record index counts (call periodically or on change).
pub fn record_index_counts(specs: usize, names: usize) {
    gauge!("crossdns.index.specs.count").set(specs as f64);
    gauge!("crossdns.index.names.count").set(names as f64);
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("crossdns.index.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Record a relisting that pruned stale specs.
pub fn record_index_resync() {
    counter!("crossdns.index.resync.count").increment(1);
}

/// Record a telemetry backend call.
pub fn record_telemetry_call(success: bool, duration: std::time::Duration) {
    let result = if success { "success" } else { "error" };
    counter!("crossdns.telemetry.call.count", "result" => result).increment(1);
    histogram!("crossdns.telemetry.call.duration.seconds").record(duration.as_secs_f64());
}

/// Record use of the fallback endpoint.
pub fn record_endpoint_fallback() {
    counter!("crossdns.endpoint.fallback.count").increment(1);
}

/// Record the number of candidate records built for a query.
pub fn record_candidates(count: usize) {
    histogram!("crossdns.answer.candidates").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
