use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use tonic::transport::Endpoint;

/// Runtime configuration for the `vidgest-producer` binary.
///
/// Every regular file found directly inside the configured directories is
/// uploaded once, with at most `concurrency` uploads in flight.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vidgest-producer",
    version,
    about = "Uploads video files to a vidgest consumer in parallel"
)]
pub struct CliArgs {
    /// Maximum number of concurrent uploads.
    ///
    /// Environment variable: `PRODUCER_CONCURRENCY`
    #[arg(short = 'p', long, env = "PRODUCER_CONCURRENCY", default_value_t = 2)]
    pub concurrency: usize,

    /// Comma-separated list of directories to upload from. Empty entries
    /// are ignored.
    ///
    /// Environment variable: `PRODUCER_VIDEOS_DIR`
    #[arg(long, env = "PRODUCER_VIDEOS_DIR", default_value = "videos")]
    pub videos_dirs: String,

    /// Consumer endpoint.
    ///
    /// Environment variable: `CONSUMER_ADDR`
    #[arg(long, env = "CONSUMER_ADDR", default_value = "http://127.0.0.1:50051")]
    pub consumer_addr: String,

    /// Base delay before a retry. The n-th retry waits n times this long.
    ///
    /// Environment variable: `RETRY_BACKOFF_MS`
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 250)]
    pub retry_backoff_ms: u64,

    /// Chunks buffered between the file reader and the gRPC stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub concurrency: usize,
    pub videos_dirs: Vec<PathBuf>,
    pub consumer_addr: String,
    pub retry_backoff: Duration,
    pub stream_buffer_size: usize,
}

impl TryFrom<CliArgs> for ProducerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.concurrency == 0 {
            bail!("PRODUCER_CONCURRENCY must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let videos_dirs: Vec<PathBuf> = args
            .videos_dirs
            .split(',')
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect();
        if videos_dirs.is_empty() {
            bail!("PRODUCER_VIDEOS_DIR must name at least one directory");
        }

        // Bare `host:port` is accepted and treated as plaintext HTTP/2.
        let consumer_addr = if args.consumer_addr.contains("://") {
            args.consumer_addr
        } else {
            format!("http://{}", args.consumer_addr)
        };
        if let Err(e) = Endpoint::from_shared(consumer_addr.clone()) {
            bail!("CONSUMER_ADDR {consumer_addr:?} is not a valid endpoint: {e}");
        }

        Ok(Self {
            concurrency: args.concurrency,
            videos_dirs,
            consumer_addr,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
            stream_buffer_size: args.stream_buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ProducerConfig> {
        let mut argv = vec!["vidgest-producer"];
        argv.extend_from_slice(args);
        ProducerConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn splits_directory_list() {
        let config = parse(&["--videos-dirs", "a,b,,c"]).unwrap();
        assert_eq!(
            config.videos_dirs,
            [PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[test]
    fn trailing_comma_in_directory_list() {
        let config = parse(&["--videos-dirs", "clips/, more ,"]).unwrap();
        assert_eq!(
            config.videos_dirs,
            [PathBuf::from("clips/"), PathBuf::from("more")]
        );
        assert!(parse(&["--videos-dirs", ",,"]).is_err());
    }

    #[test]
    fn short_concurrency_flag() {
        let config = parse(&["-p", "5"]).unwrap();
        assert_eq!(config.concurrency, 5);
        assert!(parse(&["-p", "0"]).is_err());
    }

    #[test]
    fn bare_consumer_addr_gets_a_scheme() {
        let config = parse(&["--consumer-addr", "localhost:50051"]).unwrap();
        assert_eq!(config.consumer_addr, "http://localhost:50051");
    }
}
