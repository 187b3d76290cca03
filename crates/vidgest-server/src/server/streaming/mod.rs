//! Chunked upload intake.
//!
//! ## Structure
//!
//! - [`sink`] - append-only persistence of one upload ([`ChunkSink`]).
//! - [`ingest`] - the per-call chunk state machine ([`ingest_stream`]) and
//!   the discard loop used for rejected calls ([`drain_stream`]).
//!
//! [`ChunkSink`]: sink::ChunkSink
//! [`ingest_stream`]: ingest::ingest_stream
//! [`drain_stream`]: ingest::drain_stream

pub mod ingest;
pub mod sink;
