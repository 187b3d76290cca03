use clap::Parser;
use std::process::ExitCode;
use vidgest_producer::{
    CliArgs, GrpcUploader, ProducerConfig, RetryPolicy, UploadWorkerPool, discover_files,
    producer::telemetry::init_logging,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ProducerConfig::try_from(args)?;

    init_logging()?;

    let files = discover_files(&config.videos_dirs).await;
    tracing::info!(
        "Producer starting: {} file(s), concurrency {}, consumer {}",
        files.len(),
        config.concurrency,
        config.consumer_addr
    );

    let uploader = GrpcUploader::connect_lazy(&config.consumer_addr, config.stream_buffer_size)?;
    let mut pool = UploadWorkerPool::new(
        uploader,
        config.concurrency,
        RetryPolicy::new(config.retry_backoff),
    );
    pool.extend(files);
    let metrics = pool.metrics();

    let summary = pool.run().await;
    let snapshot = metrics.snapshot();
    tracing::info!(
        uploaded = summary.uploaded.len(),
        rejected = summary.rejected.len(),
        failed = summary.failed.len(),
        attempts = snapshot.attempts,
        retries = snapshot.retries,
        "All uploads attempted"
    );

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        for (path, reason) in &summary.failed {
            tracing::error!(path = %path.display(), "Failed: {reason}");
        }
        Ok(ExitCode::FAILURE)
    }
}
