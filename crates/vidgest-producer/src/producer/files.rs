use std::path::{Path, PathBuf};
use tokio::fs;

/// Lists the regular files directly inside each directory, in directory
/// order and sorted by path within a directory.
///
/// A directory that cannot be read is logged and skipped.
pub async fn discover_files(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for dir in dirs {
        match list_dir(dir).await {
            Ok(mut found) => {
                found.sort();
                tracing::info!(dir = %dir.display(), files = found.len(), "Found files to upload");
                files.extend(found);
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), "Videos directory not readable: {e}");
            }
        }
    }
    files
}

async fn list_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
