/// Generates the gRPC client and server bindings for `proto/media.proto`.
///
/// # Byte Field Optimization
///
/// `UploadChunk.data` carries raw file bytes (up to 64 KiB per message) and is
/// marked with `.bytes(...)` so it decodes into a `bytes::Bytes` instead of a
/// `Vec<u8>`. The server can then hand each chunk to the file sink without an
/// extra copy.
///
/// # Output
///
/// Bindings are included in the crate via:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("media");
/// }
/// ```
///
/// A serialized `FileDescriptorSet` is also written to `OUT_DIR` so the server
/// can expose gRPC reflection.
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("media_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    // Chunk payloads are handed to the sink as `Bytes`, not `Vec<u8>`
    config
        .bytes([".media.UploadChunk.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/media.proto"],
        &["proto"],
    )?;

    println!("cargo:rerun-if-changed=proto/media.proto");
    Ok(())
}
