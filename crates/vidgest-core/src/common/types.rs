//! # Shared Upload Constants and Naming
//!
//! Producer and consumer agree on these values at compile time:
//!
//! - [`CHUNK_SIZE`] - payload size of every non-terminal `UploadChunk`
//! - [`QUEUE_FULL_MESSAGE`] - the only in-band admission rejection
//! - [`new_video_id`] - per-attempt identifier, a ULID rendered in Crockford
//!   base32
//!
//! File naming helpers live here too, so a record's storage and preview paths
//! can be derived from its id alone.

use ferroid::id::ULID;
use std::path::Path;

/// Number of file bytes carried by each non-terminal chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Message of the `UploadResult` sent when admission control rejects a call.
pub const QUEUE_FULL_MESSAGE: &str = "queue full";

/// Message of the `UploadResult` sent after an upload is stored.
pub const UPLOAD_RECEIVED_MESSAGE: &str = "Upload received";

/// `VideoEvent.kind` for a newly accepted upload.
pub const VIDEO_UPLOADED_EVENT: &str = "video_uploaded";

/// Container extension of derived previews.
pub const PREVIEW_EXTENSION: &str = "mp4";

/// Longest accepted video id, in bytes.
pub const MAX_VIDEO_ID_LEN: usize = 128;

/// Generates a fresh video id.
///
/// The id is a ULID: a 48-bit millisecond timestamp followed by 80 random
/// bits. It sorts by creation time, and collisions are negligible without
/// any coordination between producers.
#[must_use]
pub fn new_video_id() -> String {
    ULID::now().to_string()
}

/// Returns `true` if `video_id` can be embedded in a file name.
#[must_use]
pub fn is_valid_video_id(video_id: &str) -> bool {
    !video_id.is_empty()
        && video_id.len() <= MAX_VIDEO_ID_LEN
        && video_id != "."
        && video_id != ".."
        && !video_id.contains(['/', '\\', '\0'])
}

/// Reduces a client-supplied filename to its final path component.
///
/// Returns `None` when nothing usable remains (empty, `.` or `..`).
#[must_use]
pub fn sanitize_filename(filename: &str) -> Option<&str> {
    if filename.contains('\0') {
        return None;
    }
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
}

/// `{video_id}-{filename}`, the stored name of an uploaded original.
#[must_use]
pub fn storage_file_name(video_id: &str, filename: &str) -> String {
    format!("{video_id}-{filename}")
}

/// `{video_id}-preview.mp4`, the canonical name of a derived preview.
#[must_use]
pub fn preview_file_name(video_id: &str) -> String {
    format!("{video_id}-preview.{PREVIEW_EXTENSION}")
}

/// Scratch name the transcoder writes to before the preview is promoted to
/// its canonical name. Keeps the container extension so the transcoder can
/// infer the output format.
#[must_use]
pub fn partial_preview_file_name(video_id: &str) -> String {
    format!("{video_id}-preview.partial.{PREVIEW_EXTENSION}")
}
