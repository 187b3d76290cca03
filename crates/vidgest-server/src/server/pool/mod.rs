//! Background preview derivation.
//!
//! - [`manager`] - [`ProcessingPool`](manager::ProcessingPool): queue,
//!   dispatcher and shutdown.
//! - [`worker`] - the idempotent per-job routine.
//! - [`transcoder`] - the [`Transcoder`](transcoder::Transcoder) seam and
//!   its `ffmpeg` implementation.

pub mod manager;
pub mod transcoder;
pub mod worker;
