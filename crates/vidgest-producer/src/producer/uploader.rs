//! One upload attempt over gRPC.
//!
//! [`GrpcUploader`] streams a file as 64 KiB `UploadChunk`s followed by an
//! empty terminal chunk. A reader task fills a bounded channel that backs
//! the client-streaming call, so file reads and network sends overlap
//! without buffering the whole file.

use super::error::UploadError;
use bytes::BytesMut;
use core::future::Future;
use std::path::Path;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use vidgest_core::{
    proto::{UploadChunk, UploadResult, media_upload_client::MediaUploadClient},
    types::CHUNK_SIZE,
};

/// Performs a single upload attempt of one file under a given id.
pub trait Uploader: Send + Sync + 'static {
    fn upload(
        &self,
        path: &Path,
        video_id: &str,
    ) -> impl Future<Output = Result<UploadResult, UploadError>> + Send;
}

#[derive(Debug, Clone)]
pub struct GrpcUploader {
    client: MediaUploadClient<Channel>,
    stream_buffer_size: usize,
}

impl GrpcUploader {
    pub fn new(channel: Channel, stream_buffer_size: usize) -> Self {
        Self {
            client: MediaUploadClient::new(channel),
            stream_buffer_size,
        }
    }

    /// Builds an uploader over a lazily connected channel. Connection
    /// failures surface per call as `UNAVAILABLE`.
    pub fn connect_lazy(addr: &str, stream_buffer_size: usize) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(addr.to_string())?.connect_lazy();
        Ok(Self::new(channel, stream_buffer_size))
    }
}

impl Uploader for GrpcUploader {
    async fn upload(&self, path: &Path, video_id: &str) -> Result<UploadResult, UploadError> {
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            return Err(UploadError::InvalidFileName {
                path: path.to_path_buf(),
            });
        };
        let file = File::open(path)
            .await
            .map_err(|e| UploadError::source_read(path, e))?;
        self.upload_reader(file, path, video_id, filename).await
    }
}

impl GrpcUploader {
    /// Streams `reader` as one upload attempt. `path` only labels read
    /// errors.
    ///
    /// A read error ends the attempt at once and drops the in-flight call,
    /// so the consumer sees a stream without its last chunk.
    pub async fn upload_reader<R>(
        &self,
        reader: R,
        path: &Path,
        video_id: &str,
        filename: &str,
    ) -> Result<UploadResult, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (tx, rx) = mpsc::channel(self.stream_buffer_size);
        let mut client = self.client.clone();
        let call = client.upload(ReceiverStream::new(rx));
        let pump = pump_chunks(reader, path, video_id, filename, tx);
        tokio::pin!(call, pump);

        let mut pumped = false;
        loop {
            tokio::select! {
                read = &mut pump, if !pumped => {
                    // Returning here drops `call`, which cancels the RPC.
                    read?;
                    pumped = true;
                }
                reply = &mut call => {
                    return Ok(reply?.into_inner());
                }
            }
        }
    }
}

/// Reads `reader` into `CHUNK_SIZE` chunks and sends them, then sends the
/// empty `is_last` chunk.
///
/// Stops quietly if the receiving side is gone: the call has already
/// resolved and its outcome is reported there.
pub async fn pump_chunks<R>(
    mut reader: R,
    path: &Path,
    video_id: &str,
    filename: &str,
    tx: mpsc::Sender<UploadChunk>,
) -> Result<(), UploadError>
where
    R: AsyncRead + Unpin,
{
    let chunk = |data: bytes::Bytes, is_last: bool| UploadChunk {
        video_id: video_id.to_string(),
        filename: filename.to_string(),
        data,
        is_last,
    };

    loop {
        let mut buf = BytesMut::zeroed(CHUNK_SIZE);
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| UploadError::source_read(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        if tx.send(chunk(buf.freeze(), false)).await.is_err() {
            return Ok(());
        }
        if filled < CHUNK_SIZE {
            break;
        }
    }

    let _ = tx.send(chunk(bytes::Bytes::new(), true)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::{
        pin::Pin,
        task::{Context, Poll},
    };
    use std::io;
    use tokio::io::ReadBuf;

    async fn collect(data: &[u8]) -> Vec<UploadChunk> {
        let (tx, mut rx) = mpsc::channel(1024);
        pump_chunks(data, Path::new("a.mp4"), "v1", "a.mp4", tx)
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn splits_into_full_chunks_plus_terminal() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 10).map(|i| (i % 7) as u8).collect();
        let chunks = collect(&data).await;

        let sizes: Vec<_> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, [CHUNK_SIZE, CHUNK_SIZE, 10, 0]);
        assert_eq!(
            chunks.iter().filter(|c| c.is_last).count(),
            1,
            "exactly one terminal chunk"
        );
        assert!(chunks.last().unwrap().is_last);
        assert!(chunks.iter().all(|c| c.video_id == "v1" && c.filename == "a.mp4"));

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_short_chunk() {
        let data = vec![1_u8; CHUNK_SIZE];
        let sizes: Vec<_> = collect(&data).await.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, [CHUNK_SIZE, 0]);
    }

    #[tokio::test]
    async fn empty_file_sends_only_terminal_chunk() {
        let chunks = collect(&[]).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_last);
    }

    /// Yields some bytes, then fails.
    struct FailingReader {
        served: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                Poll::Ready(Err(io::Error::other("disk gone")))
            } else {
                self.served = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn read_error_aborts_without_terminal_chunk() {
        let (tx, mut rx) = mpsc::channel(16);
        let err = pump_chunks(
            FailingReader { served: false },
            Path::new("a.mp4"),
            "v1",
            "a.mp4",
            tx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::SourceRead { .. }));
        assert!(!err.is_transient());
        assert!(rx.recv().await.is_none(), "nothing sent before the error");
    }
}
