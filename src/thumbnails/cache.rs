//! Disk cache of high-quality thumbnails.
//!
//! Artifacts live in XDG_CACHE_HOME/filmstrip/thumbs/. Filenames are the
//! xxhash of (version, path, mtime, size), so editing or replacing a source
//! file invalidates its artifact without bookkeeping.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use super::generator::{Rendition, ThumbnailGenerator, DEFAULT_THUMB_HEIGHT};
use crate::engine::QualityPartition;
use crate::image_loader::open_image;

/// Bump when thumbnail generation semantics change.
const THUMB_CACHE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: u64,
}

impl CacheKey {
    pub fn new(path: &Path, mtime: i64, size: i64) -> Self {
        Self {
            hash: Self::compute_hash(path, mtime, size),
        }
    }

    /// Key for a file on disk, from its current metadata.
    pub fn for_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self::new(path, mtime, metadata.len() as i64))
    }

    fn compute_hash(path: &Path, mtime: i64, size: i64) -> u64 {
        let path_str = path.to_string_lossy();
        let mut data = Vec::with_capacity(path_str.len() + 17);
        data.push(THUMB_CACHE_VERSION);
        data.extend_from_slice(path_str.as_bytes());
        data.extend_from_slice(&mtime.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        xxh3_64(&data)
    }

    pub fn disk_filename(&self) -> String {
        format!("{:016x}.jpg", self.hash)
    }
}

#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    cache_dir: PathBuf,
    thumb_height: u32,
}

impl ThumbnailCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            warn!(?cache_dir, error = ?e, "Failed to create cache directory");
        }
        debug!(?cache_dir, "Initialized thumbnail cache");

        Self {
            cache_dir,
            thumb_height: DEFAULT_THUMB_HEIGHT,
        }
    }

    /// Cache in the default XDG cache directory.
    pub fn new_default() -> Result<Self> {
        Ok(Self::new(Self::default_cache_dir()?))
    }

    pub fn default_cache_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "filmstrip")
            .context("Failed to determine project directories")?;
        Ok(proj_dirs.cache_dir().join("thumbs"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn disk_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.disk_filename())
    }

    /// Whether `path` has an up-to-date artifact. Unreadable sources count as missing.
    pub fn exists(&self, path: &Path) -> bool {
        match CacheKey::for_file(path) {
            Ok(key) => self.disk_path(&key).exists(),
            Err(e) => {
                trace!(?path, error = ?e, "Treating unreadable source as missing");
                false
            }
        }
    }

    /// Split `paths` by artifact presence, preserving order.
    pub fn partition(&self, paths: Vec<PathBuf>) -> QualityPartition {
        let (existing, missing): (Vec<PathBuf>, Vec<PathBuf>) =
            paths.into_iter().partition(|p| self.exists(p));
        QualityPartition { existing, missing }
    }

    /// Read the artifact for `path`. A corrupt artifact is removed.
    pub fn load(&self, path: &Path) -> Result<Rendition> {
        let disk_path = self.disk_path(&CacheKey::for_file(path)?);
        match open_image(&disk_path) {
            Ok(img) => {
                trace!(?path, "Disk cache hit");
                Ok(Rendition::from_image(&img))
            }
            Err(e) => {
                if disk_path.exists() {
                    let _ = std::fs::remove_file(&disk_path);
                }
                Err(e.context(format!("Failed to load cached thumbnail for {:?}", path)))
            }
        }
    }

    /// Generate the artifact for `path`, replacing any previous one.
    pub fn generate(&self, path: &Path) -> Result<Rendition> {
        let disk_path = self.disk_path(&CacheKey::for_file(path)?);
        ThumbnailGenerator::quality(path, &disk_path, self.thumb_height)
    }

    /// Load the artifact, regenerating it if it is missing or unreadable.
    /// The flag is true when the result came from disk.
    pub fn load_or_generate(&self, path: &Path) -> Result<(Rendition, bool)> {
        match self.load(path) {
            Ok(rendition) => Ok((rendition, true)),
            Err(e) => {
                debug!(?path, error = %e, "Cached thumbnail unusable, regenerating");
                self.generate(path).map(|r| (r, false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Write;

    fn source(dir: &Path, name: &str, width: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, 300, Rgb([90, 90, 200]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_cache_key_hash() {
        let key1 = CacheKey::new(Path::new("/test/image.jpg"), 1234567890, 1024);
        let key2 = CacheKey::new(Path::new("/test/image.jpg"), 1234567890, 1024);
        let key3 = CacheKey::new(Path::new("/test/image.jpg"), 1234567891, 1024);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_disk_filename() {
        let key = CacheKey::new(Path::new("/test/image.jpg"), 1234567890, 1024);
        let filename = key.disk_filename();

        assert!(filename.ends_with(".jpg"));
        assert_eq!(filename.len(), 20); // 16 hex + ".jpg"
    }

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs"));
        let src = source(dir.path(), "a.png", 600);

        assert!(!cache.exists(&src));
        let generated = cache.generate(&src).unwrap();
        assert_eq!((generated.width, generated.height), (512, 256));
        assert!(cache.exists(&src));

        let loaded = cache.load(&src).unwrap();
        assert_eq!((loaded.width, loaded.height), (512, 256));
    }

    #[test]
    fn test_partition_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs"));
        let a = source(dir.path(), "a.png", 400);
        let b = source(dir.path(), "b.png", 400);
        let c = source(dir.path(), "c.png", 400);
        cache.generate(&a).unwrap();
        cache.generate(&c).unwrap();

        let partition = cache.partition(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(partition.existing, vec![a, c]);
        assert_eq!(partition.missing, vec![b]);
    }

    #[test]
    fn test_changed_source_invalidates_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs"));
        let src = source(dir.path(), "a.png", 400);
        cache.generate(&src).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&src).unwrap();
        file.write_all(b"trailer").unwrap();
        drop(file);
        assert!(!cache.exists(&src));
    }

    #[test]
    fn test_corrupt_artifact_is_removed_and_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs"));
        let src = source(dir.path(), "a.png", 400);
        let artifact = cache.disk_path(&CacheKey::for_file(&src).unwrap());
        std::fs::write(&artifact, b"corrupt").unwrap();

        assert!(cache.load(&src).is_err());
        assert!(!artifact.exists());

        let (rendition, from_disk) = cache.load_or_generate(&src).unwrap();
        assert!(!from_disk);
        assert_eq!(rendition.height, 256);
        assert!(artifact.exists());
    }

    #[test]
    fn test_missing_source_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs"));
        assert!(!cache.exists(&dir.path().join("gone.png")));
    }
}
