#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, ServerConfig},
    pool::transcoder::{FfmpegTranscoder, TranscodeReport, Transcoder},
    service::handler::MediaService,
};
