use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `vidgest-server` binary.
///
/// These settings bound intake (how many uploads may stream concurrently),
/// size the background preview pool and place files on disk. All values are
/// parsed from CLI arguments or environment variables and are read once at
/// startup.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vidgest-server",
    version,
    about = "A gRPC service that ingests chunked video uploads and derives previews"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Maximum number of uploads accepted but not yet finalized.
    ///
    /// Calls arriving while this many uploads are in flight are drained and
    /// answered with `queue full`, regardless of file size.
    ///
    /// Environment variable: `CONSUMER_Q_MAX`
    #[arg(long, env = "CONSUMER_Q_MAX", default_value_t = 10)]
    pub max_in_flight: usize,

    /// Number of preview jobs allowed to run at once.
    ///
    /// The job queue itself is unbounded; this only limits how many
    /// transcoder processes run concurrently.
    ///
    /// Environment variable: `CONSUMER_WORKERS`
    #[arg(long, env = "CONSUMER_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Directory receiving uploaded originals as `{video_id}-{filename}`.
    ///
    /// Environment variable: `CONSUMER_UPLOAD_DIR`
    #[arg(long, env = "CONSUMER_UPLOAD_DIR", default_value = "uploads")]
    pub storage_root: PathBuf,

    /// Directory receiving derived previews. Defaults to
    /// `{storage_root}/previews`.
    ///
    /// Environment variable: `CONSUMER_PREVIEW_DIR`
    #[arg(long, env = "CONSUMER_PREVIEW_DIR")]
    pub preview_root: Option<PathBuf>,

    /// Path to the external transcoder executable.
    ///
    /// Environment variable: `FFMPEG_PATH`
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub transcoder_path: PathBuf,

    /// Seconds to wait for running preview jobs during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Capacity of the "video accepted" broadcast channel. Watchers lagging
    /// further behind than this skip events.
    ///
    /// Environment variable: `EVENT_BUFFER_SIZE`
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value_t = 64)]
    pub event_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub max_in_flight: usize,
    pub workers: usize,
    pub storage_root: PathBuf,
    pub preview_root: PathBuf,
    pub transcoder_path: PathBuf,
    pub shutdown_timeout: Duration,
    pub event_buffer_size: usize,
}

impl ServerConfig {
    /// Creates the storage and preview directories if they are missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage_root)?;
        std::fs::create_dir_all(&self.preview_root)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_in_flight == 0 {
            bail!("CONSUMER_Q_MAX must be greater than 0");
        }

        if args.workers == 0 {
            bail!("CONSUMER_WORKERS must be greater than 0");
        }

        if args.event_buffer_size == 0 {
            bail!("EVENT_BUFFER_SIZE must be greater than 0");
        }

        let preview_root = args
            .preview_root
            .unwrap_or_else(|| args.storage_root.join("previews"));

        Ok(Self {
            server_addr: args.server_addr,
            max_in_flight: args.max_in_flight,
            workers: args.workers,
            storage_root: args.storage_root,
            preview_root,
            transcoder_path: args.transcoder_path,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            event_buffer_size: args.event_buffer_size,
        })
    }
}
