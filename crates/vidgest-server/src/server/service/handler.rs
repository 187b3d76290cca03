//! gRPC service implementation for chunked media ingest.
//!
//! [`MediaService`] implements the [`MediaUpload`] service. It gates each
//! `Upload` call through [`IngestAdmission`], persists admitted streams via
//! [`ingest_stream`], and hands finalized uploads to the
//! [`ProcessingPool`]. The remaining RPCs are read-only views of the
//! registry and counters.
//!
//! ## Responsibilities
//!
//! - Own the shared admission state, registry, counters and processing pool.
//! - Answer rejected calls in-band with `queue full` after draining them.
//! - Map ingest failures onto gRPC statuses.
//! - Forward "video accepted" events to `WatchVideos` subscribers.

use crate::server::{
    admission::IngestAdmission,
    config::ServerConfig,
    metrics::{PipelineMetrics, StatsSnapshot},
    pool::{
        manager::{PoolConfig, ProcessingPool},
        transcoder::{FfmpegTranscoder, Transcoder},
    },
    registry::{VideoRegistry, VideoStatus},
    streaming::ingest::{IngestOutcome, drain_stream, ingest_stream},
    telemetry::{
        decrement_uploads_inflight, increment_bytes_received, increment_upload_errors,
        increment_uploads, increment_uploads_inflight, increment_uploads_rejected,
        record_upload_duration,
    },
};
use core::pin::Pin;
use futures::Stream;
use std::{sync::Arc, time::Instant};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use vidgest_core::{
    Error,
    proto::{
        GetVideoRequest, ListVideosRequest, ListVideosResponse, StatsRequest, StatsResponse,
        UploadChunk, UploadResult, Video, VideoEvent, WatchVideosRequest,
        media_upload_server::MediaUpload,
    },
    types::{QUEUE_FULL_MESSAGE, UPLOAD_RECEIVED_MESSAGE, VIDEO_UPLOADED_EVENT},
};

/// Consumer side of the ingest pipeline.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct MediaService {
    config: ServerConfig,
    admission: Arc<IngestAdmission>,
    registry: Arc<VideoRegistry>,
    metrics: Arc<PipelineMetrics>,
    pool: Arc<ProcessingPool>,
}

impl MediaService {
    /// Creates the service with an `ffmpeg` transcoder at
    /// `config.transcoder_path` and spawns the processing pool.
    pub fn new(config: ServerConfig) -> Self {
        let transcoder = FfmpegTranscoder::new(config.transcoder_path.clone());
        Self::with_transcoder(config, transcoder)
    }

    pub fn with_transcoder<T: Transcoder>(config: ServerConfig, transcoder: T) -> Self {
        let admission = Arc::new(IngestAdmission::new(config.max_in_flight));
        let registry = Arc::new(VideoRegistry::new(config.event_buffer_size));
        let metrics = Arc::new(PipelineMetrics::new());

        let pool = ProcessingPool::start(
            PoolConfig {
                concurrency: config.workers,
                preview_root: config.preview_root.clone(),
                shutdown_timeout: config.shutdown_timeout,
            },
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::new(transcoder),
        );

        Self {
            config,
            admission,
            registry,
            metrics,
            pool: Arc::new(pool),
        }
    }

    pub const fn registry(&self) -> &Arc<VideoRegistry> {
        &self.registry
    }

    pub const fn admission(&self) -> &Arc<IngestAdmission> {
        &self.admission
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            in_flight: self.admission.in_flight(),
            max_in_flight: self.admission.max_in_flight(),
            total_rejected: self.admission.total_rejected(),
            uploads_received: self.metrics.uploads_received(),
            uploads_partial: self.metrics.uploads_partial(),
            bytes_received: self.metrics.bytes_received(),
            previews_generated: self.metrics.previews_generated(),
            previews_failed: self.metrics.previews_failed(),
            jobs_pending: self.pool.jobs_pending(),
        }
    }

    /// Runs one upload call end to end.
    ///
    /// Admission is decided before the first chunk is read. A rejected call
    /// is drained and answered `{success: false, message: "queue full"}`.
    /// An admitted call holds its slot until the stream has fully ended.
    ///
    /// # Errors
    ///
    /// Any ingest failure, including [`Error::PartialUpload`] for a stream
    /// that ended before its last chunk.
    pub async fn handle_upload<S>(&self, stream: S) -> Result<UploadResult, Error>
    where
        S: Stream<Item = Result<UploadChunk, Status>> + Unpin,
    {
        let Some(permit) = self.admission.try_admit() else {
            increment_uploads_rejected();
            let drained = drain_stream(stream).await;
            tracing::info!(
                drained,
                total_rejected = self.admission.total_rejected(),
                "Upload rejected: queue full"
            );
            return Ok(UploadResult {
                success: false,
                message: QUEUE_FULL_MESSAGE.to_string(),
            });
        };

        increment_uploads();
        increment_uploads_inflight();
        let start = Instant::now();

        let result = ingest_stream(stream, &self.config.storage_root, &self.registry).await;

        permit.release();
        decrement_uploads_inflight();
        record_upload_duration(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(IngestOutcome::Stored(stored)) => {
                self.registry.set_status(&stored.video_id, VideoStatus::Stored);
                self.metrics.record_upload_received(stored.bytes);
                increment_bytes_received(stored.bytes);
                tracing::info!(
                    video_id = %stored.video_id,
                    filename = %stored.filename,
                    bytes = stored.bytes,
                    "Upload stored"
                );

                if let Err(e) = self.pool.enqueue(&stored.video_id) {
                    tracing::warn!(video_id = %stored.video_id, "Preview not queued: {e}");
                }

                Ok(UploadResult {
                    success: true,
                    message: UPLOAD_RECEIVED_MESSAGE.to_string(),
                })
            }
            Ok(IngestOutcome::Partial {
                video_id,
                bytes,
                reason,
            }) => {
                self.metrics.record_upload_partial(bytes);
                increment_bytes_received(bytes);
                increment_upload_errors();
                tracing::warn!(video_id, bytes, "Partial upload: {reason}");
                Err(Error::PartialUpload { video_id, reason })
            }
            Err(e) => {
                increment_upload_errors();
                tracing::warn!("Upload failed: {e}");
                Err(e)
            }
        }
    }

    /// Stops the processing pool. Calls already admitted are not
    /// interrupted.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.pool.shutdown().await
    }
}

#[tonic::async_trait]
impl MediaUpload for MediaService {
    type WatchVideosStream = Pin<Box<dyn Stream<Item = Result<VideoEvent, Status>> + Send>>;

    #[tracing::instrument(name = "upload", skip_all, fields(remote = ?req.remote_addr()))]
    async fn upload(
        &self,
        req: Request<Streaming<UploadChunk>>,
    ) -> Result<Response<UploadResult>, Status> {
        // Ingest runs on its own task so a client disconnect, which drops
        // this future, still lets the stream resolve as a partial upload.
        let service = self.clone();
        let stream = req.into_inner();
        let fut = async move { service.handle_upload(stream).await };
        let fut = {
            use tracing::Instrument;
            fut.in_current_span()
        };

        let result = tokio::spawn(fut)
            .await
            .map_err(|e| Status::internal(format!("upload task failed: {e}")))??;
        Ok(Response::new(result))
    }

    async fn get_stats(
        &self,
        _req: Request<StatsRequest>,
    ) -> Result<Response<StatsResponse>, Status> {
        Ok(Response::new(self.stats().into()))
    }

    async fn list_videos(
        &self,
        _req: Request<ListVideosRequest>,
    ) -> Result<Response<ListVideosResponse>, Status> {
        let videos = self
            .registry
            .list_newest_first()
            .iter()
            .map(Video::from)
            .collect();
        Ok(Response::new(ListVideosResponse { videos }))
    }

    async fn get_video(&self, req: Request<GetVideoRequest>) -> Result<Response<Video>, Status> {
        let id = req.into_inner().id;
        match self.registry.get(&id) {
            Some(record) => Ok(Response::new(Video::from(&record))),
            None => Err(Error::NotFound { video_id: id }.into()),
        }
    }

    async fn watch_videos(
        &self,
        _req: Request<WatchVideosRequest>,
    ) -> Result<Response<Self::WatchVideosStream>, Status> {
        let mut accepted = self.registry.subscribe();
        let (tx, rx) = mpsc::channel(self.config.event_buffer_size);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = tx.closed() => {
                        tracing::debug!("Watcher disconnected");
                        break;
                    }
                    received = accepted.recv() => received,
                };
                match received {
                    Ok(record) => {
                        let event = VideoEvent {
                            kind: VIDEO_UPLOADED_EVENT.to_string(),
                            video: Some(Video::from(&record)),
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            tracing::debug!("Watcher disconnected");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Watcher lagged behind accepted events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::pool::transcoder::TranscodeReport;
    use bytes::Bytes;
    use core::time::Duration;
    use std::{io, path::Path};
    use tonic::Code;

    struct TouchTranscoder;

    impl Transcoder for TouchTranscoder {
        async fn derive_preview(&self, _input: &Path, output: &Path) -> io::Result<TranscodeReport> {
            tokio::fs::write(output, b"preview").await?;
            Ok(TranscodeReport::success())
        }
    }

    fn config(dir: &Path, max_in_flight: usize) -> ServerConfig {
        let preview_root = dir.join("previews");
        std::fs::create_dir_all(&preview_root).unwrap();
        ServerConfig {
            server_addr: "127.0.0.1:0".into(),
            max_in_flight,
            workers: 1,
            storage_root: dir.to_path_buf(),
            preview_root,
            transcoder_path: "ffmpeg".into(),
            shutdown_timeout: Duration::from_secs(1),
            event_buffer_size: 8,
        }
    }

    fn upload(id: &str, data: &[u8]) -> Vec<Result<UploadChunk, Status>> {
        vec![
            Ok(UploadChunk {
                video_id: id.into(),
                filename: "clip.mp4".into(),
                data: Bytes::copy_from_slice(data),
                is_last: false,
            }),
            Ok(UploadChunk {
                video_id: id.into(),
                filename: "clip.mp4".into(),
                data: Bytes::new(),
                is_last: true,
            }),
        ]
    }

    #[tokio::test]
    async fn stored_upload_is_queued_and_previewed() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 2), TouchTranscoder);

        let result = service
            .handle_upload(futures::stream::iter(upload("v1", b"abc")))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.message, UPLOAD_RECEIVED_MESSAGE);
        assert_eq!(service.admission().in_flight(), 0);

        for _ in 0..200 {
            if service.stats().previews_generated == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = service.registry().get("v1").unwrap();
        assert_eq!(record.status, VideoStatus::PreviewReady);
        assert_eq!(
            record.preview_path,
            Some(dir.path().join("previews").join("v1-preview.mp4"))
        );

        let stats = service.stats();
        assert_eq!(stats.uploads_received, 1);
        assert_eq!(stats.bytes_received, 3);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_call_is_drained_and_answered_queue_full() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 1), TouchTranscoder);
        let _held = service.admission().try_admit().unwrap();

        let result = service
            .handle_upload(futures::stream::iter(upload("v1", b"abc")))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.message, QUEUE_FULL_MESSAGE);
        assert_eq!(service.stats().total_rejected, 1);
        assert!(service.registry().is_empty());
        assert!(!dir.path().join("v1-clip.mp4").exists());
    }

    #[tokio::test]
    async fn partial_upload_is_aborted_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 1), TouchTranscoder);
        let mut chunks = upload("v1", b"abc");
        chunks.pop();

        let err = service
            .handle_upload(futures::stream::iter(chunks))
            .await
            .unwrap_err();

        assert_eq!(Status::from(err).code(), Code::Aborted);
        let stats = service.stats();
        assert_eq!(stats.uploads_partial, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(
            service.registry().get("v1").unwrap().status,
            VideoStatus::Receiving
        );
    }

    #[tokio::test]
    async fn get_video_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 1), TouchTranscoder);
        let status = service
            .get_video(Request::new(GetVideoRequest { id: "nope".into() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn watchers_see_accepted_uploads() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 2), TouchTranscoder);
        let mut events = service
            .watch_videos(Request::new(WatchVideosRequest {}))
            .await
            .unwrap()
            .into_inner();

        service
            .handle_upload(futures::stream::iter(upload("v1", b"abc")))
            .await
            .unwrap();

        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.kind, VIDEO_UPLOADED_EVENT);
        assert_eq!(event.video.unwrap().id, "v1");
    }

    #[tokio::test]
    async fn watcher_task_exits_when_client_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let service = MediaService::with_transcoder(config(dir.path(), 2), TouchTranscoder);
        let events = service
            .watch_videos(Request::new(WatchVideosRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(service.registry().watcher_count(), 1);

        drop(events);

        // No event is published, so only the closed channel can end the task.
        for _ in 0..200 {
            if service.registry().watcher_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(service.registry().watcher_count(), 0);
    }
}
