//! Audit trail metrics.
//!
//! Counters and histograms for the index audit trail. They complement the
//! structured logs emitted when events are dropped or bulk writes fail.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::event::AuditEventType;

// ============================================================================
// Queue Metrics
// ============================================================================

/// Events accepted into the index trail queue.
pub const EVENTS_ENQUEUED: &str = "vigil_audit_events_enqueued_total";

/// Events discarded before being persisted.
pub const EVENTS_DROPPED: &str = "vigil_audit_events_dropped_total";

// ============================================================================
// Bulk Write Metrics
// ============================================================================

/// Events persisted to an index.
pub const EVENTS_WRITTEN: &str = "vigil_audit_events_written_total";

/// Failed bulk write attempts.
pub const BULK_FAILURES: &str = "vigil_audit_bulk_failures_total";

/// Bulk write duration histogram.
pub const BULK_DURATION: &str = "vigil_audit_bulk_duration_seconds";

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The queue was at capacity.
    QueueFull,
    /// The trail was not accepting events.
    NotRunning,
    /// The batch exhausted its retries.
    RetriesExhausted,
}

impl DropReason {
    /// Label value of this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::NotRunning => "not_running",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all audit metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(EVENTS_ENQUEUED, "Total audit events queued for indexing");
    describe_counter!(EVENTS_DROPPED, "Total audit events dropped before indexing");
    describe_counter!(EVENTS_WRITTEN, "Total audit events written to an index");
    describe_counter!(BULK_FAILURES, "Total failed bulk write attempts");
    describe_histogram!(BULK_DURATION, "Duration of bulk writes in seconds");
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records an accepted event.
pub fn record_enqueued(event_type: AuditEventType) {
    counter!(EVENTS_ENQUEUED, "type" => event_type.name()).increment(1);
}

/// Records dropped events.
pub fn record_dropped(reason: DropReason, count: u64) {
    counter!(EVENTS_DROPPED, "reason" => reason.as_str()).increment(count);
}

/// Records a successful bulk write.
pub fn record_bulk_written(index: &str, count: u64, duration_secs: f64) {
    counter!(EVENTS_WRITTEN).increment(count);
    histogram!(BULK_DURATION, "index" => index.to_string()).record(duration_secs);
}

/// Records a failed bulk write attempt.
pub fn record_bulk_failure(index: &str) {
    counter!(BULK_FAILURES, "index" => index.to_string()).increment(1);
}
