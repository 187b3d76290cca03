//! Bounded-parallelism upload pool.
//!
//! [`UploadWorkerPool`] keeps a FIFO backlog of files and starts the next
//! one whenever fewer than `concurrency` uploads are active. Each file runs
//! through [`upload_with_retry`] in its own task, so one file's failure
//! never affects the others.

use super::{
    error::UploadError,
    metrics::ProducerMetrics,
    retry::{FileOutcome, RetryPolicy, upload_with_retry},
    uploader::Uploader,
};
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::Arc,
};
use tokio::task::JoinSet;

/// Per-file results of one [`UploadWorkerPool::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub uploaded: Vec<(PathBuf, String)>,
    pub rejected: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.uploaded.len() + self.rejected.len() + self.failed.len()
    }

    /// `true` when no file failed permanently. Rejections do not count as
    /// failures.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, path: PathBuf, result: Result<FileOutcome, UploadError>) {
        match result {
            Ok(FileOutcome::Uploaded { video_id, attempts }) => {
                tracing::info!(path = %path.display(), video_id, attempts, "Upload finished");
                self.uploaded.push((path, video_id));
            }
            Ok(FileOutcome::Rejected { .. }) => {
                tracing::warn!(path = %path.display(), "Queue full at consumer, dropping this upload");
                self.rejected.push(path);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "Upload failed: {e}");
                self.failed.push((path, e.to_string()));
            }
        }
    }
}

pub struct UploadWorkerPool<U> {
    uploader: Arc<U>,
    concurrency: usize,
    policy: RetryPolicy,
    backlog: VecDeque<PathBuf>,
    metrics: Arc<ProducerMetrics>,
}

impl<U: Uploader> UploadWorkerPool<U> {
    /// `concurrency` is clamped to at least one.
    pub fn new(uploader: U, concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            uploader: Arc::new(uploader),
            concurrency: concurrency.max(1),
            policy,
            backlog: VecDeque::new(),
            metrics: Arc::new(ProducerMetrics::new()),
        }
    }

    pub fn push(&mut self, path: PathBuf) {
        self.backlog.push_back(path);
    }

    pub fn metrics(&self) -> Arc<ProducerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Uploads the whole backlog and returns once every launched task has
    /// resolved.
    pub async fn run(mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut active = JoinSet::new();
        let mut paths = HashMap::new();

        loop {
            while active.len() < self.concurrency {
                let Some(path) = self.backlog.pop_front() else {
                    break;
                };
                let uploader = Arc::clone(&self.uploader);
                let metrics = Arc::clone(&self.metrics);
                let policy = self.policy;
                let task_path = path.clone();
                let handle = active.spawn(async move {
                    upload_with_retry(uploader.as_ref(), &task_path, policy, &metrics).await
                });
                paths.insert(handle.id(), path);
            }

            let Some(joined) = active.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, result)) => {
                    if let Some(path) = paths.remove(&id) {
                        summary.record(path, result);
                    }
                }
                Err(e) => {
                    let path = paths.remove(&e.id()).unwrap_or_default();
                    self.metrics.record_error();
                    tracing::error!(path = %path.display(), "Upload task failed: {e}");
                    summary.failed.push((path, e.to_string()));
                }
            }
        }

        summary
    }
}

impl<U> Extend<PathBuf> for UploadWorkerPool<U> {
    fn extend<I: IntoIterator<Item = PathBuf>>(&mut self, iter: I) {
        self.backlog.extend(iter);
    }
}
