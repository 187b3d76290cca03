#![doc = include_str!("../README.md")]

pub mod producer;

pub use producer::{
    config::{CliArgs, ProducerConfig},
    error::UploadError,
    files::discover_files,
    pool::{RunSummary, UploadWorkerPool},
    retry::{FileOutcome, MAX_ATTEMPTS, RetryPolicy, upload_with_retry},
    uploader::{GrpcUploader, Uploader},
};
