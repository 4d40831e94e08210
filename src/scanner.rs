//! Folder listing for delivery sessions.
//!
//! Only still images are listed; the pipeline has nothing to decode for video.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::task;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::models::MediaType;

/// Image files under `dir`, sorted by path.
///
/// Without `recursive` only the immediate children are considered.
/// Unreadable entries are skipped.
pub fn list_media(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Not a directory: {:?}", dir);
    }

    let mut walker = WalkDir::new(dir);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut paths: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter(|entry| MediaType::from_path(entry.path()) == Some(MediaType::Image))
        .map(|entry| entry.into_path())
        .collect();

    // Sort by path for consistent ordering
    paths.sort();

    debug!(?dir, recursive, count = paths.len(), "Listed media");
    Ok(paths)
}

/// [`list_media`] on the blocking pool.
pub async fn scan(dir: PathBuf, recursive: bool) -> Result<Vec<PathBuf>> {
    info!("Starting scan of {:?}", dir);
    task::spawn_blocking(move || list_media(&dir, recursive))
        .await
        .context("Scan task panicked")?
}
