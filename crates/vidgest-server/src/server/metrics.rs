//! Process-local pipeline counters.
//!
//! These are pure observability counters polled through `GetStats`; nothing
//! in the pipeline makes control decisions from them. Admission state
//! (`in_flight`, `total_rejected`) lives in
//! [`IngestAdmission`](super::admission::IngestAdmission) and is merged into
//! [`StatsSnapshot`] at read time.
//!
//! The OpenTelemetry instruments in [`telemetry`](super::telemetry) are
//! updated alongside these counters when the `otel-metrics` feature is on.

use portable_atomic::{AtomicU64, Ordering};
use vidgest_core::proto::StatsResponse;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    uploads_received: AtomicU64,
    uploads_partial: AtomicU64,
    bytes_received: AtomicU64,
    previews_generated: AtomicU64,
    previews_failed: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// An admitted upload reached its last chunk and was stored.
    pub fn record_upload_received(&self, bytes: u64) {
        self.uploads_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// An admitted upload ended before its last chunk.
    pub fn record_upload_partial(&self, bytes: u64) {
        self.uploads_partial.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_preview_generated(&self) {
        self.previews_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preview_failed(&self) {
        self.previews_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uploads_received(&self) -> u64 {
        self.uploads_received.load(Ordering::Relaxed)
    }

    pub fn uploads_partial(&self) -> u64 {
        self.uploads_partial.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn previews_generated(&self) -> u64 {
        self.previews_generated.load(Ordering::Relaxed)
    }

    pub fn previews_failed(&self) -> u64 {
        self.previews_failed.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of admission state and pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub total_rejected: u64,
    pub uploads_received: u64,
    pub uploads_partial: u64,
    pub bytes_received: u64,
    pub previews_generated: u64,
    pub previews_failed: u64,
    pub jobs_pending: usize,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            in_flight: s.in_flight as u64,
            max_in_flight: s.max_in_flight as u64,
            total_rejected: s.total_rejected,
            uploads_received: s.uploads_received,
            uploads_partial: s.uploads_partial,
            bytes_received: s.bytes_received,
            previews_generated: s.previews_generated,
            previews_failed: s.previews_failed,
            jobs_pending: s.jobs_pending as u64,
        }
    }
}
