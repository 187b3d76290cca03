use bytes::Bytes;
use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::FuturesUnordered;
use std::{io, path::Path};
use tokio::runtime::Builder;
use tokio_stream::StreamExt;
use tonic::Status;
use vidgest_core::{
    proto::UploadChunk,
    types::{CHUNK_SIZE, new_video_id},
};
use vidgest_server::{MediaService, ServerConfig, TranscodeReport, Transcoder};

/// Skips preview derivation so only the ingest path is measured.
struct NoopTranscoder;

impl Transcoder for NoopTranscoder {
    async fn derive_preview(&self, _input: &Path, _output: &Path) -> io::Result<TranscodeReport> {
        Ok(TranscodeReport::success())
    }
}

#[derive(Clone, Copy, Debug)]
struct IngestBenchParams {
    file_bytes: usize,
    concurrency: usize,
}

fn chunks_for(video_id: &str, payload: &Bytes) -> Vec<Result<UploadChunk, Status>> {
    let mut chunks: Vec<_> = (0..payload.len())
        .step_by(CHUNK_SIZE)
        .map(|start| {
            let end = (start + CHUNK_SIZE).min(payload.len());
            Ok(UploadChunk {
                video_id: video_id.to_string(),
                filename: "bench.bin".to_string(),
                data: payload.slice(start..end),
                is_last: false,
            })
        })
        .collect();
    chunks.push(Ok(UploadChunk {
        video_id: video_id.to_string(),
        filename: "bench.bin".to_string(),
        data: Bytes::new(),
        is_last: true,
    }));
    chunks
}

fn ingest_bench(c: &mut Criterion) {
    let file_bytes_cases = [64 * 1024, 1024 * 1024, 8 * 1024 * 1024];
    let concurrency_cases = [1, 4, 16];

    let mut cases = Vec::new();
    for &file_bytes in &file_bytes_cases {
        for &concurrency in &concurrency_cases {
            cases.push(IngestBenchParams {
                file_bytes,
                concurrency,
            });
        }
    }

    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        server_addr: "127.0.0.1:0".into(),
        max_in_flight: 64,
        workers: 2,
        storage_root: dir.path().to_path_buf(),
        preview_root: dir.path().join("previews"),
        transcoder_path: "ffmpeg".into(),
        shutdown_timeout: Duration::from_secs(1),
        event_buffer_size: 64,
    };
    config.ensure_dirs().unwrap();
    let service = rt.block_on(async { MediaService::with_transcoder(config, NoopTranscoder) });

    for params in &cases {
        let payload = Bytes::from(vec![0xA5_u8; params.file_bytes]);

        let mut group = c.benchmark_group("ingest/handle_upload");
        group.throughput(Throughput::Bytes(
            (params.file_bytes * params.concurrency) as u64,
        ));
        group.bench_function(
            format!("bytes/{}/conc/{}", params.file_bytes, params.concurrency),
            |b| {
                b.to_async(&rt).iter(|| {
                    let service = service.clone();
                    let payload = payload.clone();
                    async move {
                        let mut tasks = FuturesUnordered::new();
                        for _ in 0..params.concurrency {
                            let service = service.clone();
                            let chunks = chunks_for(&new_video_id(), &payload);
                            tasks.push(tokio::spawn(async move {
                                service
                                    .handle_upload(tokio_stream::iter(chunks))
                                    .await
                                    .expect("upload failed")
                            }));
                        }
                        while let Some(result) = tasks.next().await {
                            black_box(result.unwrap());
                        }
                    }
                });
            },
        );
        group.finish();
    }

    rt.block_on(async {
        if let Err(e) = service.shutdown().await {
            eprintln!("failed to shut down service: {e}");
        }
    });
}

criterion_group!(ingest_benches, ingest_bench);
criterion_main!(ingest_benches);
