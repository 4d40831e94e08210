//! Bounded LRU cache of decoded full-resolution images with neighbour preloading.
//!
//! The cache owns every decoded handle it holds; eviction and [`ImageCache::clear`]
//! drop them. Preloads are deduplicated per path so at most one decode for a
//! given path is in flight, and a clear invalidates decodes that started before
//! it.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{DecodeError, DeliveryError};

/// Default number of decoded images kept resident.
pub const DEFAULT_CAPACITY: usize = 50;

/// Decode collaborator producing full-resolution handles.
///
/// Calling it repeatedly for the same path is allowed; the cache does the
/// deduplication.
pub trait ImageDecoder: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    fn decode(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = Result<Self::Handle, DecodeError>> + Send;
}

/// A resident decoded image.
#[derive(Debug, Clone)]
pub struct CacheEntry<H> {
    pub path: PathBuf,
    pub handle: H,
    /// Logical access tick; larger is more recent.
    pub last_access: u64,
}

/// Outcome counts of one `preload` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub decoded: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct CacheState<H> {
    entries: LruCache<PathBuf, CacheEntry<H>>,
    /// Paths with a decode in flight, tagged with the generation that started it.
    in_flight: HashMap<PathBuf, u64>,
    clock: u64,
    generation: u64,
    evictions: u64,
}

impl<H> CacheState<H> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, path: PathBuf, handle: H) -> Option<PathBuf> {
        let last_access = self.tick();
        let mut evicted = None;
        if !self.entries.contains(&path) && self.entries.len() >= self.entries.cap().get() {
            if let Some((old_path, _old)) = self.entries.pop_lru() {
                self.evictions += 1;
                trace!(path = ?old_path, "Evicted decoded image");
                evicted = Some(old_path);
            }
        }
        self.entries.put(
            path.clone(),
            CacheEntry {
                path,
                handle,
                last_access,
            },
        );
        evicted
    }
}

pub struct ImageCache<D: ImageDecoder> {
    decoder: Arc<D>,
    state: Arc<Mutex<CacheState<D::Handle>>>,
}

impl<D: ImageDecoder> ImageCache<D> {
    pub fn new(decoder: Arc<D>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        debug!(capacity = capacity.get(), "Initialized image cache");
        Self {
            decoder,
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
                clock: 0,
                generation: 0,
                evictions: 0,
            })),
        }
    }

    /// Cached handle for `path`, refreshing its recency. `None` means the caller decodes.
    pub fn get(&self, path: &Path) -> Option<D::Handle> {
        let mut state = self.state.lock();
        let now = state.tick();
        let entry = state.entries.get_mut(path)?;
        entry.last_access = now;
        Some(entry.handle.clone())
    }

    /// Insert a decoded handle, evicting the least recently accessed entry when full.
    ///
    /// Returns the evicted path, if any.
    pub fn insert(&self, path: PathBuf, handle: D::Handle) -> Option<PathBuf> {
        self.state.lock().insert(path, handle)
    }

    /// Decode and insert every path that is neither cached nor already being decoded.
    ///
    /// Failures are logged and skipped; they never insert an entry and never
    /// stop the remaining paths. A [`clear`](Self::clear) during the call ends
    /// it: remaining paths are counted as skipped and never decoded.
    pub async fn preload(&self, paths: Vec<PathBuf>) -> PreloadReport {
        let mut report = PreloadReport::default();
        let generation = self.state.lock().generation;
        let total = paths.len();

        for (done, path) in paths.into_iter().enumerate() {
            {
                let mut state = self.state.lock();
                if state.generation != generation {
                    trace!(remaining = total - done, "Preload abandoned after cache clear");
                    report.skipped += total - done;
                    break;
                }
                if state.entries.contains(&path) || state.in_flight.contains_key(&path) {
                    report.skipped += 1;
                    continue;
                }
                state.in_flight.insert(path.clone(), generation);
            }

            trace!(?path, "Preloading image");
            let result = self.decoder.decode(path.clone()).await;

            let mut state = self.state.lock();
            if state.in_flight.get(&path) == Some(&generation) {
                state.in_flight.remove(&path);
            }
            let stale = state.generation != generation;

            match result {
                Ok(handle) if !stale => {
                    state.insert(path, handle);
                    report.decoded += 1;
                }
                Ok(_) => {
                    trace!(?path, "Dropping decode finished after cache clear");
                    report.skipped += 1;
                }
                Err(e) => {
                    let err = DeliveryError::from(e);
                    warn!(?path, error = %err, "Preload decode failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Release every handle. Decodes still in flight will not insert.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
        state.generation += 1;
        debug!("Cleared image cache");
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().entries.contains(path)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Total evictions since creation.
    pub fn evictions(&self) -> u64 {
        self.state.lock().evictions
    }

    /// Resident paths, most recently accessed first.
    pub fn paths_by_recency(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Access tick of a resident path without refreshing it.
    pub fn last_access(&self, path: &Path) -> Option<u64> {
        self.state.lock().entries.peek(path).map(|e| e.last_access)
    }
}

impl<D: ImageDecoder> Clone for ImageCache<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: Arc::clone(&self.decoder),
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDecoder {
        calls: AtomicUsize,
        failing: HashSet<PathBuf>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl ImageDecoder for CountingDecoder {
        type Handle = Arc<String>;

        fn decode(
            &self,
            path: PathBuf,
        ) -> impl Future<Output = Result<Self::Handle, DecodeError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.failing.contains(&path);
            let gate = self.gate.clone();
            async move {
                match gate {
                    Some(gate) => gate.notified().await,
                    None => tokio::task::yield_now().await,
                }
                if fail {
                    Err(DecodeError::new(path, "corrupt"))
                } else {
                    Ok(Arc::new(path.display().to_string()))
                }
            }
        }
    }

    fn cache(capacity: usize) -> (ImageCache<CountingDecoder>, Arc<CountingDecoder>) {
        let decoder = Arc::new(CountingDecoder::default());
        (ImageCache::new(decoder.clone(), capacity), decoder)
    }

    fn handle(name: &str) -> Arc<String> {
        Arc::new(name.to_string())
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let (cache, _) = cache(3);
        let (a, b, c, d) = (
            PathBuf::from("/p/a.jpg"),
            PathBuf::from("/p/b.jpg"),
            PathBuf::from("/p/c.jpg"),
            PathBuf::from("/p/d.jpg"),
        );

        assert_eq!(cache.insert(a.clone(), handle("a")), None);
        assert_eq!(cache.insert(b.clone(), handle("b")), None);
        assert_eq!(cache.insert(c.clone(), handle("c")), None);
        assert!(cache.get(&a).is_some());

        assert_eq!(cache.insert(d.clone(), handle("d")), Some(b.clone()));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.evictions(), 1);
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert!(cache.contains(&d));
    }

    #[test]
    fn test_get_refreshes_last_access() {
        let (cache, _) = cache(3);
        let a = PathBuf::from("/p/a.jpg");
        cache.insert(a.clone(), handle("a"));
        let before = cache.last_access(&a).unwrap();
        cache.get(&a);
        assert!(cache.last_access(&a).unwrap() > before);
        assert!(cache.get(Path::new("/p/missing.jpg")).is_none());
    }

    #[test]
    fn test_reinsert_replaces_without_eviction() {
        let (cache, _) = cache(2);
        let a = PathBuf::from("/p/a.jpg");
        let b = PathBuf::from("/p/b.jpg");
        cache.insert(a.clone(), handle("a1"));
        cache.insert(b.clone(), handle("b"));
        assert_eq!(cache.insert(a.clone(), handle("a2")), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a).as_deref().map(String::as_str), Some("a2"));
        assert_eq!(cache.paths_by_recency(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_concurrent_preloads_decode_once() {
        let (cache, decoder) = cache(4);
        let p = PathBuf::from("/p/a.jpg");

        let (first, second) = tokio::join!(
            cache.preload(vec![p.clone()]),
            cache.preload(vec![p.clone()])
        );

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.decoded + second.decoded, 1);
        assert_eq!(first.skipped + second.skipped, 1);
        assert!(cache.contains(&p));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_is_isolated() {
        let decoder = Arc::new(CountingDecoder {
            failing: [PathBuf::from("/p/bad.jpg")].into_iter().collect(),
            ..Default::default()
        });
        let cache = ImageCache::new(decoder.clone(), 4);

        let report = cache
            .preload(vec![
                PathBuf::from("/p/a.jpg"),
                PathBuf::from("/p/bad.jpg"),
                PathBuf::from("/p/c.jpg"),
            ])
            .await;

        assert_eq!(
            report,
            PreloadReport {
                decoded: 2,
                skipped: 0,
                failed: 1
            }
        );
        assert!(!cache.contains(Path::new("/p/bad.jpg")));
        assert!(cache.contains(Path::new("/p/c.jpg")));
    }

    #[tokio::test]
    async fn test_cached_paths_are_skipped() {
        let (cache, decoder) = cache(4);
        let a = PathBuf::from("/p/a.jpg");
        cache.insert(a.clone(), handle("a"));

        let report = cache.preload(vec![a]).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_discards_inflight_decode() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let decoder = Arc::new(CountingDecoder {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = ImageCache::new(decoder, 4);
        let a = PathBuf::from("/p/a.jpg");

        let background = cache.clone();
        let path = a.clone();
        let task = tokio::spawn(async move { background.preload(vec![path]).await });

        // Let the preload claim the path and park inside the decoder.
        while cache.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }
        cache.clear();
        gate.notify_one();
        let report = task.await.unwrap();

        assert!(!cache.contains(&a));
        assert_eq!(report.decoded, 0);
        assert_eq!(report.skipped, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_stops_remaining_preloads() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let decoder = Arc::new(CountingDecoder {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let cache = ImageCache::new(decoder.clone(), 4);
        let paths = vec![
            PathBuf::from("/old/a.jpg"),
            PathBuf::from("/old/b.jpg"),
            PathBuf::from("/old/c.jpg"),
        ];

        let background = cache.clone();
        let task = tokio::spawn(async move { background.preload(paths).await });

        while cache.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }
        cache.clear();
        gate.notify_one();
        let report = task.await.unwrap();

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            report,
            PreloadReport {
                decoded: 0,
                skipped: 3,
                failed: 0
            }
        );
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight_count(), 0);

        // A preload started after the clear runs normally.
        let fresh = PathBuf::from("/new/a.jpg");
        let background = cache.clone();
        let path = fresh.clone();
        let task = tokio::spawn(async move { background.preload(vec![path]).await });
        while cache.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        assert_eq!(task.await.unwrap().decoded, 1);
        assert!(cache.contains(&fresh));
    }
}
