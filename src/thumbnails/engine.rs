//! In-process generation engine backed by worker threads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::cache::ThumbnailCache;
use super::generator::{ThumbnailGenerator, FAST_THUMB_HEIGHT};
use super::queue::{Job, JobBoard, JobKind};
use crate::config::{DeliveryConfig, MAX_WORKERS};
use crate::engine::{EngineEvent, EventSink, GenerationEngine, QualityPartition};
use crate::error::EngineError;
use crate::models::{ThumbnailRecord, Tier};
use crate::session::{SessionToken, Subscription};
use crate::viewport::VisibleWindow;

/// State shared between the engine handle and its workers.
struct Shared {
    board: JobBoard,
    cache: ThumbnailCache,
    routes: Mutex<HashMap<SessionToken, EventSink>>,
}

impl Shared {
    /// Deliver `event` to the live subscription of its token, if there is one.
    fn emit(&self, event: EngineEvent) {
        let token = event.token();
        let sink = self.routes.lock().get(&token).cloned();
        match sink {
            Some(sink) => {
                if sink.send(event).is_err() {
                    trace!(token = %token, "Event sink closed");
                }
            }
            None => trace!(token = %token, "No live subscription, dropping event"),
        }
    }
}

pub struct LocalEngine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalEngine {
    /// Start `workers` threads (clamped to 1..=MAX_WORKERS) over `cache`.
    pub fn new(cache: ThumbnailCache, workers: usize) -> Result<Self> {
        let num_workers = workers.clamp(1, MAX_WORKERS);
        let shared = Arc::new(Shared {
            board: JobBoard::new(),
            cache,
            routes: Mutex::new(HashMap::new()),
        });

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("thumb-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, shared))
                .context("Failed to spawn thumbnail worker")?;
            handles.push(handle);
        }

        debug!(num_workers, cache_dir = ?shared.cache.cache_dir(), "Started thumbnail engine");

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => ThumbnailCache::new(dir.clone()),
            None => ThumbnailCache::new_default()?,
        };
        Self::new(cache, config.workers)
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.shared.cache
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.board.queued()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.shared.routes.lock().len()
    }

    /// Stop the workers after their current job and wait for them.
    pub fn shutdown(&self) {
        self.shared.board.shutdown();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.shared.board.is_shut_down() {
            Err(EngineError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn submit(
        &self,
        token: SessionToken,
        kind: JobKind,
        paths: Vec<PathBuf>,
        hint: Option<VisibleWindow>,
    ) -> Result<(), EngineError> {
        self.ensure_running()?;
        if self.shared.board.is_cancelled(token) {
            trace!(token = %token, ?kind, "Ignoring request for cancelled session");
            return Ok(());
        }

        if paths.is_empty() {
            self.shared.emit(completion_event(kind, token));
            return Ok(());
        }

        let queued = self.shared.board.submit(token, kind, paths, hint);
        debug!(token = %token, ?kind, queued, "Queued thumbnail jobs");
        Ok(())
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl GenerationEngine for LocalEngine {
    fn subscribe(&self, token: SessionToken, sink: EventSink) -> Subscription {
        self.shared.routes.lock().insert(token, sink);
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Subscription::new(token, move || {
            if let Some(shared) = shared.upgrade() {
                shared.routes.lock().remove(&token);
            }
        })
    }

    async fn start_fast_generation(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.shared.board.register_folder(token, &paths);
        self.submit(token, JobKind::Fast, paths, None)
    }

    async fn cancel_generation(&self, token: SessionToken) -> Result<(), EngineError> {
        if self.shared.board.cancel(token) {
            self.shared.emit(EngineEvent::QualityCancelled { token });
        }
        Ok(())
    }

    async fn classify_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<QualityPartition, EngineError> {
        self.ensure_running()?;
        let cache = self.shared.cache.clone();
        let partition = tokio::task::spawn_blocking(move || cache.partition(paths))
            .await
            .map_err(|e| EngineError::Command(format!("classification task failed: {e}")))?;

        debug!(
            token = %token,
            existing = partition.existing.len(),
            missing = partition.missing.len(),
            "Classified quality tier"
        );
        Ok(partition)
    }

    async fn load_existing_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.submit(token, JobKind::Existing, paths, None)
    }

    async fn start_quality_generation(
        &self,
        paths: Vec<PathBuf>,
        initial_hint: VisibleWindow,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.submit(token, JobKind::Quality, paths, Some(initial_hint))
    }

    async fn update_priority_hint(
        &self,
        visible: VisibleWindow,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.ensure_running()?;
        trace!(token = %token, visible = visible.len(), "Priority hint");
        self.shared.board.set_hint(token, visible);
        Ok(())
    }
}

fn completion_event(kind: JobKind, token: SessionToken) -> EngineEvent {
    match kind {
        JobKind::Fast => EngineEvent::FastAllComplete { token },
        JobKind::Existing => EngineEvent::ExistingLoaded { token },
        JobKind::Quality => EngineEvent::QualityAllComplete { token },
    }
}

fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker_id, "Thumbnail worker started");

    while let Some(job) = shared.board.next() {
        if let Some(record) = process_job(&job, &shared.cache) {
            if !shared.board.is_cancelled(job.token) {
                let event = match job.kind {
                    JobKind::Fast => EngineEvent::FastReady {
                        token: job.token,
                        record,
                    },
                    JobKind::Existing | JobKind::Quality => EngineEvent::QualityReady {
                        token: job.token,
                        record,
                    },
                };
                shared.emit(event);
            }
        }

        // Failures count as done.
        if shared.board.finish(&job) {
            shared.emit(completion_event(job.kind, job.token));
        }
    }

    debug!(worker_id, "Thumbnail worker stopped");
}

fn process_job(job: &Job, cache: &ThumbnailCache) -> Option<ThumbnailRecord> {
    trace!(path = ?job.path, kind = ?job.kind, "Processing thumbnail job");

    let result = match job.kind {
        JobKind::Fast => ThumbnailGenerator::fast(&job.path, FAST_THUMB_HEIGHT)
            .map(|r| r.into_record(job.path.clone(), Tier::Fast)),
        JobKind::Existing => cache.load_or_generate(&job.path).map(|(r, from_disk)| {
            let tier = if from_disk { Tier::CacheHit } else { Tier::Dct };
            r.into_record(job.path.clone(), tier)
        }),
        JobKind::Quality => cache
            .generate(&job.path)
            .map(|r| r.into_record(job.path.clone(), Tier::Dct)),
    };

    match result {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = ?job.path, kind = ?job.kind, error = ?e, "Failed to produce thumbnail");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::time::Duration;

    const T1: SessionToken = SessionToken::new(1);
    const T2: SessionToken = SessionToken::new(2);

    fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                RgbImage::from_pixel(320, 240, Rgb([200, 120, 40]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    fn engine(dir: &Path, workers: usize) -> LocalEngine {
        LocalEngine::new(ThumbnailCache::new(dir.join("thumbs")), workers).unwrap()
    }

    async fn next_event(rx: &flume::Receiver<EngineEvent>) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(20), rx.recv_async())
            .await
            .expect("timed out waiting for engine event")
            .expect("event channel closed")
    }

    /// Collect events up to and including the first one matching `last`.
    async fn collect_until(
        rx: &flume::Receiver<EngineEvent>,
        last: impl Fn(&EngineEvent) -> bool,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = last(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn ready_tiers(events: &[EngineEvent]) -> Vec<Tier> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::FastReady { record, .. } | EngineEvent::QualityReady { record, .. } => {
                    Some(record.tier)
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fast_generation_reports_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_images(dir.path(), &["a.png", "b.png", "c.png"]);
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();
        paths.push(broken);

        let engine = engine(dir.path(), 2);
        let (tx, rx) = flume::unbounded();
        let _sub = engine.subscribe(T1, tx);
        engine.start_fast_generation(paths, T1).await.unwrap();

        let events =
            collect_until(&rx, |e| matches!(e, EngineEvent::FastAllComplete { .. })).await;
        assert_eq!(ready_tiers(&events), vec![Tier::Fast; 3]);
        for event in &events {
            assert_eq!(event.token(), T1);
            if let EngineEvent::FastReady { record, .. } = event {
                assert_eq!((record.width, record.height), (128, 96));
            }
        }
    }

    #[tokio::test]
    async fn test_quality_round_trip_through_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_images(dir.path(), &["a.png", "b.png"]);
        let engine = engine(dir.path(), 1);
        let (tx, rx) = flume::unbounded();
        let _sub = engine.subscribe(T1, tx);

        let partition = engine.classify_quality_tier(paths.clone(), T1).await.unwrap();
        assert!(partition.existing.is_empty());
        assert_eq!(partition.missing, paths);

        engine
            .start_quality_generation(partition.missing, VisibleWindow::from_indices([1]), T1)
            .await
            .unwrap();
        let events =
            collect_until(&rx, |e| matches!(e, EngineEvent::QualityAllComplete { .. })).await;
        assert_eq!(ready_tiers(&events), vec![Tier::Dct; 2]);

        let partition = engine.classify_quality_tier(paths.clone(), T1).await.unwrap();
        assert_eq!(partition.existing, paths);
        assert!(partition.missing.is_empty());

        engine
            .load_existing_quality_tier(partition.existing, T1)
            .await
            .unwrap();
        let events =
            collect_until(&rx, |e| matches!(e, EngineEvent::ExistingLoaded { .. })).await;
        assert_eq!(ready_tiers(&events), vec![Tier::CacheHit; 2]);
    }

    #[tokio::test]
    async fn test_empty_requests_complete_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 1);
        let (tx, rx) = flume::unbounded();
        let _sub = engine.subscribe(T1, tx);

        engine.start_fast_generation(Vec::new(), T1).await.unwrap();
        assert!(matches!(
            next_event(&rx).await,
            EngineEvent::FastAllComplete { token } if token == T1
        ));
    }

    #[tokio::test]
    async fn test_events_only_reach_live_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_images(dir.path(), &["a.png"]);
        let engine = engine(dir.path(), 1);

        let (old_tx, old_rx) = flume::unbounded();
        let old = engine.subscribe(T1, old_tx);
        let (tx, rx) = flume::unbounded();
        let _sub = engine.subscribe(T2, tx);
        assert_eq!(engine.live_subscriptions(), 2);

        drop(old);
        assert_eq!(engine.live_subscriptions(), 1);

        // One worker, FIFO: T1's jobs finish before T2's.
        engine.start_fast_generation(paths.clone(), T1).await.unwrap();
        engine.start_fast_generation(paths, T2).await.unwrap();
        collect_until(&rx, |e| matches!(e, EngineEvent::FastAllComplete { .. })).await;

        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 1);
        let (tx, rx) = flume::unbounded();
        let _sub = engine.subscribe(T1, tx);

        // Nothing outstanding: no QualityCancelled.
        engine.cancel_generation(T1).await.unwrap();
        assert!(rx.try_recv().is_err());

        // Later requests for a cancelled session are ignored.
        let paths = write_images(dir.path(), &["a.png"]);
        engine.start_fast_generation(paths, T1).await.unwrap();
        assert_eq!(engine.queued(), 0);
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 1);
        engine.shutdown();

        let err = engine
            .start_fast_generation(vec![PathBuf::from("/x.png")], T1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable));
        assert!(engine.classify_quality_tier(Vec::new(), T1).await.is_err());
    }
}
