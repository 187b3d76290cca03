//! Shared protocol bindings, constants and errors.
//!
//! - [`proto`] - generated `media` package (messages, client and server).
//! - [`types`] - wire-level constants, id generation and file naming.
//! - [`error`] - the service error type and its `tonic::Status` mapping.

pub mod error;
pub mod types;

pub use error::{Error, Result};

pub mod proto {
    tonic::include_proto!("media");

    /// Encoded descriptor set for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("media_descriptor");
}
