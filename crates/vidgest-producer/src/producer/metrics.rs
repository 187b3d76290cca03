use portable_atomic::{AtomicU64, Ordering};

/// Producer-side counters. Observability only.
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    errors: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerMetricsSnapshot {
    /// Upload calls started, retries included.
    pub attempts: u64,
    pub successes: u64,
    /// Attempts repeated after a transient failure.
    pub retries: u64,
    /// Files that failed permanently.
    pub errors: u64,
    /// Files turned away with `queue full`.
    pub rejected: u64,
}

impl ProducerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProducerMetricsSnapshot {
        ProducerMetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
