//! Bounded pool of preview jobs fed by an unbounded FIFO queue.
//!
//! [`ProcessingPool`] owns the sending half of the job queue. A single
//! dispatcher task pulls jobs in submission order, but only after acquiring
//! one of `concurrency` semaphore permits, so no more than `concurrency`
//! transcoder runs overlap and jobs start in FIFO order.
//!
//! The queue is intentionally unbounded: admission control already limits
//! how fast uploads finalize, and a finalized upload must never be refused
//! processing. Queue contents are volatile and lost on shutdown.

use super::{
    transcoder::Transcoder,
    worker::{JobContext, ProcessingJob, process_job},
};
use crate::server::{
    metrics::PipelineMetrics,
    registry::{VideoRegistry, VideoStatus},
};
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::{path::PathBuf, sync::Arc};
use tokio::{
    sync::{Semaphore, mpsc},
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vidgest_core::Error;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub preview_root: PathBuf,
    /// How long shutdown waits for running jobs before aborting them.
    pub shutdown_timeout: Duration,
}

pub struct ProcessingPool {
    jobs: mpsc::UnboundedSender<ProcessingJob>,
    pending: Arc<AtomicUsize>,
    registry: Arc<VideoRegistry>,
    shutdown_token: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessingPool {
    /// Spawns the dispatcher. Must be called inside a Tokio runtime.
    pub fn start<T: Transcoder>(
        config: PoolConfig,
        registry: Arc<VideoRegistry>,
        metrics: Arc<PipelineMetrics>,
        transcoder: Arc<T>,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown_token = CancellationToken::new();

        let ctx = Arc::new(JobContext {
            registry: Arc::clone(&registry),
            metrics,
            preview_root: config.preview_root,
            transcoder,
        });

        let dispatcher = tokio::spawn(dispatch(
            rx,
            ctx,
            Arc::new(Semaphore::new(config.concurrency)),
            Arc::clone(&pending),
            shutdown_token.clone(),
            config.shutdown_timeout,
        ));

        Self {
            jobs,
            pending,
            registry,
            shutdown_token,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queues a preview job and marks the record `Queued`.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once shutdown has begun; the record is left
    /// at `Stored`.
    pub fn enqueue(&self, video_id: &str) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        // Set before sending so a fast worker's terminal status is never
        // overwritten by `Queued`.
        self.registry.set_status(video_id, VideoStatus::Queued);
        self.pending.fetch_add(1, Ordering::AcqRel);

        let job = ProcessingJob {
            video_id: video_id.to_string(),
        };
        if self.jobs.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.registry.set_status(video_id, VideoStatus::Stored);
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    /// Jobs queued but not yet started.
    pub fn jobs_pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stops accepting jobs and waits for the dispatcher to wind down.
    ///
    /// Running jobs get up to the configured shutdown timeout; queued jobs
    /// are dropped and logged.
    pub async fn shutdown(&self) -> Result<(), Error> {
        tracing::info!("Refusing new preview jobs");
        self.shutdown_token.cancel();

        let Some(handle) = self.dispatcher.lock().take() else {
            return Ok(());
        };

        handle.await.map_err(|e| Error::ChannelError {
            context: format!("preview dispatcher failed: {e}"),
        })?;

        tracing::info!("Processing pool shutdown complete");
        Ok(())
    }
}

async fn dispatch<T: Transcoder>(
    mut rx: mpsc::UnboundedReceiver<ProcessingJob>,
    ctx: Arc<JobContext<T>>,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
) {
    let mut running = JoinSet::new();

    loop {
        let permit = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        pending.fetch_sub(1, Ordering::AcqRel);

        let span = tracing::info_span!("preview", video_id = %job.video_id);
        let ctx = Arc::clone(&ctx);
        running.spawn(
            async move {
                let _permit = permit;
                process_job(&ctx, job).await;
            }
            .instrument(span),
        );

        while let Some(finished) = running.try_join_next() {
            log_join_error(finished);
        }
    }

    rx.close();
    let mut dropped = 0_usize;
    while let Ok(job) = rx.try_recv() {
        pending.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(video_id = %job.video_id, "Dropping queued preview job");
        dropped += 1;
    }
    if dropped > 0 {
        tracing::warn!(dropped, "Dropped queued preview jobs at shutdown");
    }

    tracing::debug!(running = running.len(), "Waiting for running preview jobs");
    let drained = timeout(shutdown_timeout, async {
        while let Some(finished) = running.join_next().await {
            log_join_error(finished);
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            aborted = running.len(),
            "Preview jobs did not finish in time; aborting"
        );
        running.shutdown().await;
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!("Preview job panicked: {e}");
        }
    }
}
