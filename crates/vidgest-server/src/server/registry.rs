//! In-memory registry of uploaded videos.
//!
//! [`VideoRegistry`] maps a video id to its [`VideoRecord`]. It is written by
//! the ingest handler (insert, `Stored`, `Queued`) and by the processing pool
//! (`PreviewReady`/`PreviewFailed`), and read by the query RPCs. The two
//! writer stages for one id never overlap in time, so a single `RwLock` over
//! the map is enough; no lock is held across an `.await`.
//!
//! Newly accepted records are also published on a broadcast channel so
//! notification collaborators can follow intake without polling.
//!
//! All state is process-local and lost on restart.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use vidgest_core::{Error, proto};

/// Lifecycle of an uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoStatus {
    /// First chunk seen; bytes are still arriving.
    Receiving,
    /// Upload finalized on storage.
    Stored,
    /// Preview job submitted to the processing pool.
    Queued,
    PreviewReady,
    PreviewFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: String,
    pub filename: String,
    pub storage_path: PathBuf,
    pub preview_path: Option<PathBuf>,
    pub created_at: SystemTime,
    pub status: VideoStatus,
}

impl VideoRecord {
    /// A freshly accepted upload, stamped with the current time.
    pub fn receiving(id: String, filename: String, storage_path: PathBuf) -> Self {
        Self {
            id,
            filename,
            storage_path,
            preview_path: None,
            created_at: SystemTime::now(),
            status: VideoStatus::Receiving,
        }
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

impl From<VideoStatus> for proto::VideoStatus {
    fn from(status: VideoStatus) -> Self {
        match status {
            VideoStatus::Receiving => Self::Receiving,
            VideoStatus::Stored => Self::Stored,
            VideoStatus::Queued => Self::Queued,
            VideoStatus::PreviewReady => Self::PreviewReady,
            VideoStatus::PreviewFailed => Self::PreviewFailed,
        }
    }
}

impl From<&VideoRecord> for proto::Video {
    fn from(record: &VideoRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            storage_path: record.storage_path.display().to_string(),
            preview_path: record
                .preview_path
                .as_ref()
                .map(|p| p.display().to_string()),
            created_at_ms: record.created_at_ms(),
            status: proto::VideoStatus::from(record.status).into(),
        }
    }
}

/// Shared id → record map plus the "video accepted" event channel.
#[derive(Debug)]
pub struct VideoRegistry {
    records: RwLock<HashMap<String, VideoRecord>>,
    accepted: broadcast::Sender<VideoRecord>,
}

impl VideoRegistry {
    pub fn new(event_buffer_size: usize) -> Self {
        let (accepted, _) = broadcast::channel(event_buffer_size);
        Self {
            records: RwLock::new(HashMap::new()),
            accepted,
        }
    }

    /// Registers a new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateVideo`] if the id is already known; the
    /// existing record is left untouched.
    pub fn insert(&self, record: VideoRecord) -> Result<(), Error> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(Error::DuplicateVideo {
                video_id: record.id,
            });
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Publishes a newly accepted record to subscribers.
    ///
    /// Fire-and-forget: having no subscribers is not a failure.
    pub fn notify_accepted(&self, record: VideoRecord) {
        let receivers = self.accepted.send(record).unwrap_or(0);
        tracing::trace!(receivers, "Published video accepted event");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoRecord> {
        self.accepted.subscribe()
    }

    /// Number of live subscriptions to accepted-video events.
    pub fn watcher_count(&self) -> usize {
        self.accepted.receiver_count()
    }

    pub fn get(&self, id: &str) -> Option<VideoRecord> {
        self.records.read().get(id).cloned()
    }

    /// Applies `f` to the record under the write lock.
    ///
    /// Returns `None` if the id is unknown.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut VideoRecord) -> R) -> Option<R> {
        self.records.write().get_mut(id).map(f)
    }

    pub fn set_status(&self, id: &str, status: VideoStatus) -> bool {
        self.update(id, |record| record.status = status).is_some()
    }

    /// Every record, newest first. Ties on `created_at` are broken by id,
    /// descending; ULID ids sort by creation time too.
    pub fn list_newest_first(&self) -> Vec<VideoRecord> {
        let mut list: Vec<_> = self.records.read().values().cloned().collect();
        list.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        list
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
