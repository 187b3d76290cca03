use super::transcoder::Transcoder;
use crate::server::{
    metrics::PipelineMetrics,
    registry::{VideoRegistry, VideoStatus},
    telemetry::record_preview,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::fs;
use vidgest_core::types::{partial_preview_file_name, preview_file_name};

/// Deferred preview derivation for one finalized upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    pub video_id: String,
}

/// Everything a job needs, shared by all jobs of one pool.
pub struct JobContext<T> {
    pub registry: Arc<VideoRegistry>,
    pub metrics: Arc<PipelineMetrics>,
    pub preview_root: PathBuf,
    pub transcoder: Arc<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// No record for the id.
    Dropped,
    /// The recorded preview is already on disk.
    AlreadyDone,
    /// A finished preview was found at the canonical path and recorded.
    Recovered,
    Generated,
    Failed,
}

/// Runs one job to completion. Idempotent: the transcoder is only invoked
/// when no finished preview exists for the id.
pub async fn process_job<T: Transcoder>(ctx: &JobContext<T>, job: ProcessingJob) -> JobOutcome {
    let video_id = job.video_id.as_str();
    let Some(record) = ctx.registry.get(video_id) else {
        tracing::debug!(video_id, "Dropping job for unknown video");
        return JobOutcome::Dropped;
    };

    if let Some(existing) = &record.preview_path {
        if file_exists(existing).await {
            tracing::debug!(video_id, "Preview already recorded");
            return JobOutcome::AlreadyDone;
        }
    }

    let canonical = ctx.preview_root.join(preview_file_name(video_id));
    if file_exists(&canonical).await {
        mark_ready(&ctx.registry, video_id, canonical);
        tracing::info!(video_id, "Recorded existing preview");
        return JobOutcome::Recovered;
    }

    let scratch = ctx.preview_root.join(partial_preview_file_name(video_id));
    let start = Instant::now();
    let result = ctx
        .transcoder
        .derive_preview(&record.storage_path, &scratch)
        .await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let failure = match result {
        Ok(report) if report.is_success() => match fs::rename(&scratch, &canonical).await {
            Ok(()) => None,
            Err(e) => Some(format!("promoting {}: {e}", scratch.display())),
        },
        Ok(report) => Some(format!(
            "transcoder exited with {}: {}",
            report
                .exit_code
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            report.stderr_tail
        )),
        Err(e) => Some(format!("transcoder could not be launched: {e}")),
    };

    match failure {
        None => {
            mark_ready(&ctx.registry, video_id, canonical);
            ctx.metrics.record_preview_generated();
            record_preview(true, elapsed_ms);
            tracing::info!(video_id, elapsed_ms, "Preview generated");
            JobOutcome::Generated
        }
        Some(reason) => {
            let _ = fs::remove_file(&scratch).await;
            ctx.registry.set_status(video_id, VideoStatus::PreviewFailed);
            ctx.metrics.record_preview_failed();
            record_preview(false, elapsed_ms);
            tracing::warn!(video_id, "Preview failed: {reason}");
            JobOutcome::Failed
        }
    }
}

fn mark_ready(registry: &VideoRegistry, video_id: &str, preview: PathBuf) {
    registry.update(video_id, |record| {
        record.preview_path = Some(preview);
        record.status = VideoStatus::PreviewReady;
    });
}

async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{pool::transcoder::TranscodeReport, registry::VideoRecord};
    use portable_atomic::{AtomicUsize, Ordering};
    use std::io;

    /// Writes a fake preview and counts invocations.
    #[derive(Default)]
    struct CountingTranscoder {
        calls: AtomicUsize,
        exit_code: i32,
    }

    impl Transcoder for CountingTranscoder {
        async fn derive_preview(&self, _input: &Path, output: &Path) -> io::Result<TranscodeReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.exit_code == 0 {
                fs::write(output, b"preview").await?;
                Ok(TranscodeReport::success())
            } else {
                Ok(TranscodeReport::failed(self.exit_code, "invalid data"))
            }
        }
    }

    struct UnlaunchableTranscoder;

    impl Transcoder for UnlaunchableTranscoder {
        async fn derive_preview(&self, _input: &Path, _output: &Path) -> io::Result<TranscodeReport> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such program"))
        }
    }

    fn context<T>(dir: &Path, transcoder: T) -> JobContext<T> {
        let registry = Arc::new(VideoRegistry::new(4));
        registry
            .insert(VideoRecord::receiving(
                "v1".into(),
                "a.mp4".into(),
                dir.join("v1-a.mp4"),
            ))
            .unwrap();
        JobContext {
            registry,
            metrics: Arc::new(PipelineMetrics::new()),
            preview_root: dir.to_path_buf(),
            transcoder: Arc::new(transcoder),
        }
    }

    fn job(id: &str) -> ProcessingJob {
        ProcessingJob {
            video_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn generates_once_then_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), CountingTranscoder::default());

        assert_eq!(process_job(&ctx, job("v1")).await, JobOutcome::Generated);
        assert_eq!(process_job(&ctx, job("v1")).await, JobOutcome::AlreadyDone);
        assert_eq!(ctx.transcoder.calls.load(Ordering::SeqCst), 1);

        let record = ctx.registry.get("v1").unwrap();
        assert_eq!(record.status, VideoStatus::PreviewReady);
        assert_eq!(record.preview_path, Some(dir.path().join("v1-preview.mp4")));
        assert!(!dir.path().join("v1-preview.partial.mp4").exists());
        assert_eq!(ctx.metrics.previews_generated(), 1);
    }

    #[tokio::test]
    async fn existing_canonical_preview_is_recorded_without_transcoding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("v1-preview.mp4"), b"done").await.unwrap();
        let ctx = context(dir.path(), CountingTranscoder::default());

        assert_eq!(process_job(&ctx, job("v1")).await, JobOutcome::Recovered);
        assert_eq!(ctx.transcoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            ctx.registry.get("v1").unwrap().status,
            VideoStatus::PreviewReady
        );
    }

    #[tokio::test]
    async fn unknown_video_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), CountingTranscoder::default());
        assert_eq!(process_job(&ctx, job("nope")).await, JobOutcome::Dropped);
        assert_eq!(ctx.transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = CountingTranscoder {
            exit_code: 1,
            ..Default::default()
        };
        let ctx = context(dir.path(), transcoder);

        assert_eq!(process_job(&ctx, job("v1")).await, JobOutcome::Failed);
        let record = ctx.registry.get("v1").unwrap();
        assert_eq!(record.status, VideoStatus::PreviewFailed);
        assert!(record.preview_path.is_none());
        assert_eq!(ctx.metrics.previews_failed(), 1);
    }

    #[tokio::test]
    async fn launch_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), UnlaunchableTranscoder);
        assert_eq!(process_job(&ctx, job("v1")).await, JobOutcome::Failed);
        assert_eq!(ctx.metrics.previews_failed(), 1);
    }
}
