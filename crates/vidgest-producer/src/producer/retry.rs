//! Per-file retry policy.
//!
//! Each attempt streams the file from byte zero under a fresh video id, so
//! a retried upload never collides with the partial record an earlier
//! attempt may have left on the consumer.

use super::{error::UploadError, metrics::ProducerMetrics, uploader::Uploader};
use core::time::Duration;
use std::path::Path;
use vidgest_core::types::{QUEUE_FULL_MESSAGE, new_video_id};

/// Total attempts per file, the first one included.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the first retry; the n-th retry waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(backoff: Duration) -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

/// How a file's upload resolved without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded { video_id: String, attempts: u32 },
    /// The consumer answered `queue full`. Not retried.
    Rejected { attempts: u32 },
}

/// Uploads `path`, retrying transient failures.
///
/// # Errors
///
/// The first permanent error, or [`UploadError::RetriesExhausted`] once
/// `policy.max_attempts` transient failures have occurred.
pub async fn upload_with_retry<U: Uploader>(
    uploader: &U,
    path: &Path,
    policy: RetryPolicy,
    metrics: &ProducerMetrics,
) -> Result<FileOutcome, UploadError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let video_id = new_video_id();
        metrics.record_attempt();

        let err = match uploader.upload(path, &video_id).await {
            Ok(reply) if reply.success => {
                metrics.record_success();
                return Ok(FileOutcome::Uploaded {
                    video_id,
                    attempts: attempt,
                });
            }
            Ok(reply) if reply.message == QUEUE_FULL_MESSAGE => {
                metrics.record_rejected();
                return Ok(FileOutcome::Rejected { attempts: attempt });
            }
            Ok(reply) => UploadError::Refused {
                message: reply.message,
            },
            Err(e) => e,
        };

        if !err.is_transient() {
            metrics.record_error();
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            metrics.record_error();
            return Err(UploadError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            path = %path.display(),
            video_id,
            attempt,
            "Transient upload failure, retrying in {delay:?}: {err}"
        );
        metrics.record_retry();
        tokio::time::sleep(delay).await;
    }
}
