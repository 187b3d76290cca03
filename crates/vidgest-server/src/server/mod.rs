pub mod admission;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod service;
pub mod streaming;
pub mod telemetry;
