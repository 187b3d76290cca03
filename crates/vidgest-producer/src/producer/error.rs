//! Upload failure classification.
//!
//! Only transport-level unavailability is worth retrying: a fresh attempt
//! may reach a consumer that has come back. Everything else, including a
//! local read error, fails the file for good.

use std::{io, path::PathBuf};
use tonic::{Code, Status};

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    /// The source file could not be opened or read.
    #[error("reading {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("source path {} has no usable file name", path.display())]
    InvalidFileName { path: PathBuf },

    /// The call ended with a gRPC status.
    #[error("consumer returned {:?}: {}", .0.code(), .0.message())]
    Rpc(#[from] Status),

    /// The consumer answered `success = false` with something other than
    /// the admission rejection.
    #[error("consumer refused upload: {message}")]
    Refused { message: String },

    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<UploadError>,
    },
}

impl UploadError {
    pub fn source_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// `UNAVAILABLE` and `DEADLINE_EXCEEDED` are transient; everything else
    /// is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc(status) => matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded),
            _ => false,
        }
    }
}
