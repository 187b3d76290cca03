//! Per-call chunk handling for admitted uploads.
//!
//! [`ingest_stream`] consumes one client stream in arrival order:
//!
//! 1. The first non-empty `video_id` and `filename` fix the call's identity.
//!    Later values are ignored.
//! 2. Once both are known the [`ChunkSink`] is opened, a `Receiving` record
//!    is registered and the "video accepted" event is published.
//! 3. Every non-empty `data` is appended.
//! 4. `is_last` finalizes the sink. Chunks after it are ignored.
//!
//! The function returns only after the stream has fully ended, so the caller
//! can release admission and enqueue processing at that point.

use super::sink::{ChunkSink, StoredUpload};
use crate::server::registry::{VideoRecord, VideoRegistry};
use futures::{Stream, StreamExt};
use std::path::Path;
use tonic::Status;
use vidgest_core::{
    Error,
    proto::UploadChunk,
    types::{is_valid_video_id, sanitize_filename},
};

/// How an admitted stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The last chunk arrived and the file was finalized.
    Stored(StoredUpload),
    /// The stream ended or failed before the last chunk. The partial file
    /// and its `Receiving` record stay behind.
    Partial {
        video_id: String,
        bytes: u64,
        reason: String,
    },
}

/// Consumes an admitted upload stream into `storage_root`.
///
/// # Errors
///
/// Contract violations (no chunks, data before identity, unusable ids or
/// filenames, a last chunk without identity) are [`Error::InvalidRequest`].
/// A reused id is [`Error::DuplicateVideo`]; I/O failures are
/// [`Error::Storage`].
pub async fn ingest_stream<S>(
    mut stream: S,
    storage_root: &Path,
    registry: &VideoRegistry,
) -> Result<IngestOutcome, Error>
where
    S: Stream<Item = Result<UploadChunk, Status>> + Unpin,
{
    let mut video_id = String::new();
    let mut filename = String::new();
    let mut sink: Option<ChunkSink> = None;
    let mut stored: Option<StoredUpload> = None;
    let mut chunks = 0_usize;

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(status) => {
                if stored.is_some() {
                    tracing::debug!("Stream error after last chunk ignored: {status}");
                    break;
                }
                return match sink {
                    Some(sink) => Ok(IngestOutcome::Partial {
                        video_id,
                        bytes: sink.abandon().await,
                        reason: format!("stream failed: {}", status.message()),
                    }),
                    None => Err(Error::invalid(format!(
                        "stream failed before identity: {}",
                        status.message()
                    ))),
                };
            }
        };
        chunks += 1;

        if stored.is_some() {
            tracing::warn!(video_id, "Ignoring chunk received after last chunk");
            continue;
        }

        if video_id.is_empty() && !chunk.video_id.is_empty() {
            video_id = chunk.video_id;
        }
        if filename.is_empty() && !chunk.filename.is_empty() {
            filename = chunk.filename;
        }

        if sink.is_none() {
            if !video_id.is_empty() && !filename.is_empty() {
                sink = Some(open_sink(storage_root, registry, &video_id, &filename).await?);
            } else if !chunk.data.is_empty() {
                return Err(Error::invalid("chunk data arrived before video_id and filename"));
            }
        }

        if let Some(sink) = sink.as_mut() {
            if !chunk.data.is_empty() {
                sink.append(&chunk.data).await?;
            }
        }

        if chunk.is_last {
            let Some(open) = sink.take() else {
                return Err(Error::invalid("last chunk arrived without video_id and filename"));
            };
            stored = Some(open.finalize().await?);
        }
    }

    if let Some(stored) = stored {
        return Ok(IngestOutcome::Stored(stored));
    }

    match sink {
        Some(sink) => Ok(IngestOutcome::Partial {
            video_id,
            bytes: sink.abandon().await,
            reason: "stream ended before last chunk".to_string(),
        }),
        None if chunks == 0 => Err(Error::invalid("upload stream carried no chunks")),
        None => Err(Error::invalid("stream ended without video_id and filename")),
    }
}

async fn open_sink(
    storage_root: &Path,
    registry: &VideoRegistry,
    video_id: &str,
    filename: &str,
) -> Result<ChunkSink, Error> {
    if !is_valid_video_id(video_id) {
        return Err(Error::invalid(format!("unusable video_id {video_id:?}")));
    }
    let Some(filename) = sanitize_filename(filename) else {
        return Err(Error::invalid(format!("unusable filename {filename:?}")));
    };
    if registry.get(video_id).is_some() {
        return Err(Error::DuplicateVideo {
            video_id: video_id.to_string(),
        });
    }

    let sink = ChunkSink::create(storage_root, video_id, filename).await?;
    let record = VideoRecord::receiving(
        video_id.to_string(),
        filename.to_string(),
        sink.path().to_path_buf(),
    );

    // A concurrent call may have registered the id between the check above
    // and here; the loser removes the file it just created.
    if let Err(e) = registry.insert(record.clone()) {
        sink.discard().await;
        return Err(e);
    }
    registry.notify_accepted(record);

    tracing::debug!(video_id, filename, "Receiving upload");
    Ok(sink)
}

/// Reads and discards every remaining message of a rejected call.
///
/// Returns the number of chunks drained. A transport error ends the drain
/// early; the call is answered with the rejection either way.
pub async fn drain_stream<S>(mut stream: S) -> usize
where
    S: Stream<Item = Result<UploadChunk, Status>> + Unpin,
{
    let mut drained = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(_) => drained += 1,
            Err(status) => {
                tracing::debug!("Drain of rejected upload ended early: {status}");
                break;
            }
        }
    }
    drained
}
