//! External preview derivation.
//!
//! [`Transcoder`] is the seam between the processing pool and the program
//! that actually cuts previews. [`FfmpegTranscoder`] shells out to `ffmpeg`;
//! tests substitute their own implementation.

use core::future::Future;
use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;

/// Length of the derived preview clip, in seconds.
pub const PREVIEW_CLIP_SECONDS: u32 = 10;

/// Bytes of transcoder stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 2048;

/// Exit status and diagnostics of one transcoder run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
}

impl TranscodeReport {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            stderr_tail: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr_tail: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr_tail: stderr_tail.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

pub trait Transcoder: Send + Sync + 'static {
    /// Derives a preview of `input` into `output`, overwriting it.
    ///
    /// An `Err` means the transcoder could not be launched at all; a
    /// non-zero exit is reported through [`TranscodeReport`].
    fn derive_preview(
        &self,
        input: &Path,
        output: &Path,
    ) -> impl Future<Output = io::Result<TranscodeReport>> + Send;
}

/// Runs `ffmpeg` to cut a fast-start clip from the start of the input.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    clip_seconds: u32,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            clip_seconds: PREVIEW_CLIP_SECONDS,
        }
    }

    #[must_use]
    pub const fn with_clip_seconds(mut self, clip_seconds: u32) -> Self {
        self.clip_seconds = clip_seconds;
        self
    }

    /// Command-line arguments for one run.
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-ss", "0", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-t".to_string(),
                self.clip_seconds.to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    async fn derive_preview(&self, input: &Path, output: &Path) -> io::Result<TranscodeReport> {
        let out = Command::new(&self.program)
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(TranscodeReport {
            exit_code: out.status.code(),
            stderr_tail: stderr_tail(&out.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
