//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a sync run and
//! emits the corresponding Prometheus metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when rows are written to a destination table.
pub struct RecordsWritten {
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(count = self.count, "Records written");
        counter!("tradesync_records_written_total").increment(self.count);
    }
}

/// Event emitted for each batch written to the destination.
pub struct BatchesWritten {
    pub count: u64,
}

impl InternalEvent for BatchesWritten {
    fn emit(self) {
        counter!("tradesync_batches_written_total").increment(self.count);
    }
}

/// Event emitted when overlap-window duplicates are dropped before writing.
pub struct RowsDeduplicated {
    pub count: u64,
}

impl InternalEvent for RowsDeduplicated {
    fn emit(self) {
        trace!(count = self.count, "Rows deduplicated");
        counter!("tradesync_rows_deduplicated_total").increment(self.count);
    }
}

/// Outcome of processing one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    Empty,
    Skipped,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Empty => "empty",
            SourceStatus::Skipped => "skipped",
            SourceStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a source finishes processing.
pub struct SourceProcessed {
    pub status: SourceStatus,
}

impl InternalEvent for SourceProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Source processed");
        counter!("tradesync_sources_processed_total", "status" => self.status.as_str())
            .increment(1);
    }
}

/// Status of an upstream fetch.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when an upstream fetch completes.
pub struct FetchCompleted {
    pub status: RequestStatus,
}

impl InternalEvent for FetchCompleted {
    fn emit(self) {
        counter!("tradesync_fetch_requests_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted with the duration of an upstream fetch.
pub struct FetchDuration {
    pub duration: Duration,
}

impl InternalEvent for FetchDuration {
    fn emit(self) {
        histogram!("tradesync_fetch_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a cursor read falls back to the default lookback.
pub struct CursorFallback;

impl InternalEvent for CursorFallback {
    fn emit(self) {
        counter!("tradesync_cursor_fallbacks_total").increment(1);
    }
}
