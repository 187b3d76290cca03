use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use vidgest_core::{Error, types::storage_file_name};

/// Append-only file receiving the chunks of one accepted upload.
///
/// The file lives at `{storage_root}/{video_id}-{filename}` and is opened
/// with create-new semantics, so an existing original is never truncated.
#[derive(Debug)]
pub struct ChunkSink {
    video_id: String,
    filename: String,
    path: PathBuf,
    file: BufWriter<File>,
    bytes_written: u64,
}

/// A finalized upload: the file is flushed and closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub video_id: String,
    pub filename: String,
    pub storage_path: PathBuf,
    pub bytes: u64,
}

impl ChunkSink {
    /// Creates the destination file.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateVideo`] if the file already exists, otherwise
    /// [`Error::Storage`].
    pub async fn create(storage_root: &Path, video_id: &str, filename: &str) -> Result<Self, Error> {
        let path = storage_root.join(storage_file_name(video_id, filename));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::DuplicateVideo {
                    video_id: video_id.to_string(),
                },
                _ => Error::storage(format!("open {}", path.display()), e),
            })?;

        Ok(Self {
            video_id: video_id.to_string(),
            filename: filename.to_string(),
            path,
            file: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Appends `data` after everything written so far.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| Error::storage(format!("write {}", self.path.display()), e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flushes and closes the file.
    pub async fn finalize(mut self) -> Result<StoredUpload, Error> {
        self.file
            .shutdown()
            .await
            .map_err(|e| Error::storage(format!("flush {}", self.path.display()), e))?;

        Ok(StoredUpload {
            video_id: self.video_id,
            filename: self.filename,
            storage_path: self.path,
            bytes: self.bytes_written,
        })
    }

    /// Flushes whatever arrived and leaves the partial file in place.
    /// Returns the number of bytes that reached the sink.
    pub async fn abandon(mut self) -> u64 {
        if let Err(e) = self.file.shutdown().await {
            tracing::warn!(path = %self.path.display(), "Failed to flush partial upload: {e}");
        }
        self.bytes_written
    }

    /// Closes and removes the file. Used when the upload is refused after
    /// the file was already created.
    pub async fn discard(self) {
        let Self { path, file, .. } = self;
        drop(file);
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), "Failed to remove discarded upload: {e}");
        }
    }
}
