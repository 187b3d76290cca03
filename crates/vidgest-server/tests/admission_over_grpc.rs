use bytes::Bytes;
use core::time::Duration;
use std::{io, net::SocketAddr, path::Path};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Channel, Server};
use vidgest_core::{
    proto::{
        StatsRequest, UploadChunk, UploadResult, media_upload_client::MediaUploadClient,
        media_upload_server::MediaUploadServer,
    },
    types::QUEUE_FULL_MESSAGE,
};
use vidgest_server::{
    MediaService, ServerConfig, TranscodeReport, Transcoder, server::registry::VideoStatus,
};

struct TouchTranscoder;

impl Transcoder for TouchTranscoder {
    async fn derive_preview(&self, _input: &Path, output: &Path) -> io::Result<TranscodeReport> {
        tokio::fs::write(output, b"preview").await?;
        Ok(TranscodeReport::success())
    }
}

async fn start_server(root: &Path, max_in_flight: usize) -> (SocketAddr, MediaService) {
    let config = ServerConfig {
        server_addr: "127.0.0.1:0".into(),
        max_in_flight,
        workers: 1,
        storage_root: root.to_path_buf(),
        preview_root: root.join("previews"),
        transcoder_path: "ffmpeg".into(),
        shutdown_timeout: Duration::from_secs(1),
        event_buffer_size: 8,
    };
    config.ensure_dirs().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = MediaService::with_transcoder(config, TouchTranscoder);

    tokio::spawn(
        Server::builder()
            .add_service(MediaUploadServer::new(service.clone()))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    (addr, service)
}

async fn client(addr: SocketAddr) -> MediaUploadClient<Channel> {
    MediaUploadClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}

fn chunk(id: &str, data: &'static [u8], is_last: bool) -> UploadChunk {
    UploadChunk {
        video_id: id.to_string(),
        filename: "clip.mp4".to_string(),
        data: Bytes::from_static(data),
        is_last,
    }
}

/// An upload whose stream stays open until the returned sender is used.
struct HeldUpload {
    tx: mpsc::Sender<UploadChunk>,
    call: JoinHandle<Result<UploadResult, tonic::Status>>,
}

impl HeldUpload {
    async fn open(addr: SocketAddr, id: &str) -> Self {
        let (tx, rx) = mpsc::channel(4);
        tx.send(chunk(id, b"first", false)).await.unwrap();
        let mut client = client(addr).await;
        let call = tokio::spawn(async move {
            client
                .upload(ReceiverStream::new(rx))
                .await
                .map(tonic::Response::into_inner)
        });
        Self { tx, call }
    }

    async fn finish(self, id: &str) -> UploadResult {
        self.tx.send(chunk(id, b"", true)).await.unwrap();
        drop(self.tx);
        self.call.await.unwrap().unwrap()
    }
}

async fn one_shot(addr: SocketAddr, id: &str) -> UploadResult {
    let chunks = vec![chunk(id, b"payload", false), chunk(id, b"", true)];
    client(addr)
        .await
        .upload(tokio_stream::iter(chunks))
        .await
        .unwrap()
        .into_inner()
}

async fn wait_for_in_flight(addr: SocketAddr, expected: u64) {
    let mut client = client(addr).await;
    for _ in 0..500 {
        let stats = client.get_stats(StatsRequest {}).await.unwrap().into_inner();
        if stats.in_flight == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("in_flight never reached {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn third_concurrent_upload_is_rejected_until_a_slot_frees() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, service) = start_server(dir.path(), 2).await;

    let a = HeldUpload::open(addr, "A").await;
    let b = HeldUpload::open(addr, "B").await;
    wait_for_in_flight(addr, 2).await;

    let c = one_shot(addr, "C").await;
    assert!(!c.success);
    assert_eq!(c.message, QUEUE_FULL_MESSAGE);
    assert!(service.registry().get("C").is_none());

    assert!(a.finish("A").await.success);
    wait_for_in_flight(addr, 1).await;

    let d = one_shot(addr, "D").await;
    assert!(d.success);

    assert!(b.finish("B").await.success);
    wait_for_in_flight(addr, 0).await;

    let stats = service.stats();
    assert_eq!(stats.total_rejected, 1);
    assert_eq!(stats.uploads_received, 3);
    assert_eq!(
        tokio::fs::read(dir.path().join("A-clip.mp4")).await.unwrap(),
        b"first"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn n_plus_k_concurrent_uploads() {
    const N: usize = 3;
    const K: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let (addr, service) = start_server(dir.path(), N).await;

    let mut held = Vec::new();
    for i in 0..N {
        held.push(HeldUpload::open(addr, &format!("held-{i}")).await);
    }
    wait_for_in_flight(addr, N as u64).await;

    let mut rejected = 0;
    for i in 0..K {
        let result = one_shot(addr, &format!("extra-{i}")).await;
        if !result.success && result.message == QUEUE_FULL_MESSAGE {
            rejected += 1;
        }
    }
    assert_eq!(rejected, K);

    for (i, upload) in held.into_iter().enumerate() {
        assert!(upload.finish(&format!("held-{i}")).await.success);
    }
    assert_eq!(service.stats().total_rejected, K as u64);
    assert_eq!(service.stats().uploads_received, N as u64);
}

#[tokio::test]
async fn stream_closed_without_last_chunk_is_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, service) = start_server(dir.path(), 2).await;

    let status = client(addr)
        .await
        .upload(tokio_stream::iter(vec![chunk("P", b"half", false)]))
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::Aborted);
    assert_eq!(service.stats().uploads_partial, 1);
    assert_eq!(service.stats().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_disconnect_mid_stream_is_counted_as_partial() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, service) = start_server(dir.path(), 1).await;

    let upload = HeldUpload::open(addr, "X").await;
    wait_for_in_flight(addr, 1).await;

    // Cancel the call from the client side with the stream still open.
    upload.call.abort();
    drop(upload.tx);

    for _ in 0..500 {
        if service.stats().uploads_partial == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stats = service.stats();
    assert_eq!(stats.uploads_partial, 1);
    assert_eq!(stats.uploads_received, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(
        service.registry().get("X").map(|record| record.status),
        Some(VideoStatus::Receiving)
    );
    assert_eq!(
        tokio::fs::read(dir.path().join("X-clip.mp4")).await.unwrap(),
        b"first"
    );

    // The freed slot admits the next upload.
    assert!(one_shot(addr, "Y").await.success);
}
