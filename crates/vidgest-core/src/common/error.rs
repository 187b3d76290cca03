//! Error types for the ingest service.
//!
//! [`Error`] covers every fault the consumer can report for an upload call.
//! Admission rejection is deliberately absent: it is an expected outcome
//! carried in-band by `UploadResult`, not an error.
//!
//! `From<Error> for tonic::Status` picks the status code a producer uses to
//! classify the failure. Only `UNAVAILABLE` (and `DEADLINE_EXCEEDED`, raised
//! by the transport) are treated as transient on the producer side, so only
//! [`Error::ServiceShutdown`] invites a retry.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The chunk sequence violates the upload contract.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// An upload reused a video id that is already registered.
    #[error("Video {video_id} already exists")]
    DuplicateVideo { video_id: String },

    /// The stream terminated before the last-chunk marker. The partial file
    /// and its `Receiving` record are left in place.
    #[error("Partial upload of {video_id}: {reason}")]
    PartialUpload { video_id: String, reason: String },

    /// Reading or writing local storage failed.
    #[error("Storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    #[error("Video {video_id} not found")]
    NotFound { video_id: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::DuplicateVideo { video_id } => {
                Status::already_exists(format!("Video {video_id} already exists"))
            }
            Error::PartialUpload { video_id, reason } => {
                Status::aborted(format!("Partial upload of {video_id}: {reason}"))
            }
            Error::Storage { context, source } => {
                Status::internal(format!("Storage error ({context}): {source}"))
            }
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::NotFound { video_id } => Status::not_found(format!("Video {video_id} not found")),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn shutdown_maps_to_unavailable() {
        let status: Status = Error::ServiceShutdown.into();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[test]
    fn partial_upload_maps_to_aborted() {
        let status: Status = Error::PartialUpload {
            video_id: "abc".into(),
            reason: "stream ended before last chunk".into(),
        }
        .into();
        assert_eq!(status.code(), Code::Aborted);
        assert!(status.message().contains("abc"));
    }

    #[test]
    fn storage_error_keeps_context() {
        let err = Error::storage(
            "open uploads/x-a.mp4",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("uploads/x-a.mp4"));
    }
}
