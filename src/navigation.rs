//! Viewer navigation: keeps the neighbours of the current image decoded.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::image_cache::{ImageCache, ImageDecoder, PreloadReport};
use crate::models::NavigationCursor;

/// Images preloaded behind the current one.
pub const DEFAULT_PRELOAD_BEHIND: usize = 3;

/// Images preloaded ahead of the current one.
pub const DEFAULT_PRELOAD_AHEAD: usize = 5;

/// Indices to keep decoded around `index` in a list of `len` items.
///
/// `None` when the list is empty.
pub fn preload_window(
    index: usize,
    len: usize,
    behind: usize,
    ahead: usize,
) -> Option<RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }
    let index = index.min(len - 1);
    let start = index.saturating_sub(behind);
    let end = index.saturating_add(ahead).min(len - 1);
    Some(start..=end)
}

/// Tracks the viewer cursor for the current folder and launches neighbour preloads.
pub struct Navigator<D: ImageDecoder> {
    cache: ImageCache<D>,
    paths: Vec<PathBuf>,
    cursor: Option<NavigationCursor>,
    behind: usize,
    ahead: usize,
}

impl<D: ImageDecoder> Navigator<D> {
    pub fn new(cache: ImageCache<D>, behind: usize, ahead: usize) -> Self {
        Self {
            cache,
            paths: Vec::new(),
            cursor: None,
            behind,
            ahead,
        }
    }

    pub fn cache(&self) -> &ImageCache<D> {
        &self.cache
    }

    pub fn cursor(&self) -> Option<&NavigationCursor> {
        self.cursor.as_ref()
    }

    /// Switch to a new folder listing; every decoded handle is released.
    pub fn reset(&mut self, paths: Vec<PathBuf>) {
        self.cache.clear();
        self.paths = paths;
        self.cursor = None;
    }

    /// Move the cursor to `index` and preload its neighbours in the background.
    ///
    /// Returns the handle of the preload task, or `None` for an out-of-range index.
    pub fn navigate(&mut self, index: usize) -> Option<JoinHandle<PreloadReport>> {
        let path = self.paths.get(index)?.clone();
        self.cursor = Some(NavigationCursor::new(path, index));

        let range = preload_window(index, self.paths.len(), self.behind, self.ahead)?;
        // The current image first, then neighbours by distance.
        let mut wanted: Vec<usize> = range.collect();
        wanted.sort_by_key(|i| i.abs_diff(index));
        let paths: Vec<PathBuf> = wanted
            .into_iter()
            .map(|i| self.paths[i].clone())
            .filter(|p| !self.cache.contains(p))
            .collect();

        debug!(index, preload = paths.len(), "Navigated");
        if paths.is_empty() {
            return None;
        }

        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            let report = cache.preload(paths).await;
            trace!(?report, "Neighbour preload finished");
            report
        });
        Some(handle)
    }

    /// Navigate to the listing entry for `path`, if present.
    pub fn navigate_to_path(&mut self, path: &std::path::Path) -> Option<JoinHandle<PreloadReport>> {
        let index = self.paths.iter().position(|p| p == path)?;
        self.navigate(index)
    }
}
