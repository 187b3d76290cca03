pub mod config;
pub mod error;
pub mod files;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod telemetry;
pub mod uploader;
