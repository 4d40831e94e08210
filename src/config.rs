//! Tunables for the delivery service and the local engine.
//!
//! Defaults come from the constants below; `FILMSTRIP_*` environment variables
//! override them. Unparseable or zero values are ignored.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::image_cache::DEFAULT_CAPACITY;
use crate::navigation::{DEFAULT_PRELOAD_AHEAD, DEFAULT_PRELOAD_BEHIND};
use crate::viewport::DEFAULT_DEBOUNCE;

/// Default number of thumbnail worker threads.
pub const DEFAULT_WORKERS: usize = 2;

/// Maximum number of thumbnail worker threads.
pub const MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Decoded full-resolution images kept resident.
    pub cache_capacity: usize,
    /// Images preloaded behind the current one.
    pub preload_behind: usize,
    /// Images preloaded ahead of the current one.
    pub preload_ahead: usize,
    /// Minimum spacing between visible-window recomputations.
    pub debounce: Duration,
    /// Thumbnail worker threads for the local engine.
    pub workers: usize,
    /// Disk cache for high-quality thumbnails; `None` uses the XDG cache dir.
    pub cache_dir: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            preload_behind: DEFAULT_PRELOAD_BEHIND,
            preload_ahead: DEFAULT_PRELOAD_AHEAD,
            debounce: DEFAULT_DEBOUNCE,
            workers: DEFAULT_WORKERS,
            cache_dir: None,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

impl DeliveryConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let config = Self::default().with_overrides(env_usize);
        debug!(?config, "Loaded delivery config");
        config
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<usize>) -> Self {
        if let Some(v) = lookup("FILMSTRIP_CACHE_CAPACITY") {
            self.cache_capacity = v;
        }
        if let Some(v) = lookup("FILMSTRIP_PRELOAD_BEHIND") {
            self.preload_behind = v;
        }
        if let Some(v) = lookup("FILMSTRIP_PRELOAD_AHEAD") {
            self.preload_ahead = v;
        }
        if let Some(v) = lookup("FILMSTRIP_DEBOUNCE_MS") {
            self.debounce = Duration::from_millis(v as u64);
        }
        if let Some(v) = lookup("FILMSTRIP_WORKERS") {
            self.workers = v;
        }
        self.workers = self.workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    pub fn preload(mut self, behind: usize, ahead: usize) -> Self {
        self.preload_behind = behind;
        self.preload_ahead = ahead;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.clamp(1, MAX_WORKERS);
        self
    }

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }
}
