//! Boundary to the thumbnail generation engine.
//!
//! The engine does the pixel work somewhere else (worker threads, another
//! process). The coordinator only issues commands through [`GenerationEngine`]
//! and consumes the [`EngineEvent`]s pushed to the sink it subscribed.

use std::future::Future;
use std::path::PathBuf;

use crate::error::EngineError;
use crate::models::ThumbnailRecord;
use crate::session::{SessionToken, Subscription};
use crate::viewport::VisibleWindow;

/// Where an engine pushes events for one session.
pub type EventSink = flume::Sender<EngineEvent>;

/// Split of a folder into paths that already have a high-quality artifact and
/// paths that still need one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityPartition {
    pub existing: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

/// Events pushed by the engine, each tagged with the session it belongs to.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One fast-tier thumbnail is ready.
    FastReady {
        token: SessionToken,
        record: ThumbnailRecord,
    },
    /// Every path of the fast-tier request has been processed.
    FastAllComplete { token: SessionToken },
    /// One high-quality thumbnail is ready, either generated (`Dct`) or
    /// loaded from an existing artifact (`CacheHit`).
    QualityReady {
        token: SessionToken,
        record: ThumbnailRecord,
    },
    /// Every path of the quality generation request has been processed.
    QualityAllComplete { token: SessionToken },
    /// Quality generation for the session stopped before finishing.
    QualityCancelled { token: SessionToken },
    /// Every path of the existing-artifact load has been processed.
    ExistingLoaded { token: SessionToken },
}

impl EngineEvent {
    pub fn token(&self) -> SessionToken {
        match self {
            EngineEvent::FastReady { token, .. }
            | EngineEvent::FastAllComplete { token }
            | EngineEvent::QualityReady { token, .. }
            | EngineEvent::QualityAllComplete { token }
            | EngineEvent::QualityCancelled { token }
            | EngineEvent::ExistingLoaded { token } => *token,
        }
    }
}

/// Async command surface of a generation engine.
///
/// Every command is tagged with the session token; the engine tags the
/// events it produces with the same token.
pub trait GenerationEngine: Send + Sync + 'static {
    /// Route events for `token` to `sink` until the returned subscription is dropped.
    fn subscribe(&self, token: SessionToken, sink: EventSink) -> Subscription;

    fn start_fast_generation(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Best effort. Work that already finished or never existed is not an error.
    fn cancel_generation(
        &self,
        token: SessionToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn classify_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> impl Future<Output = Result<QualityPartition, EngineError>> + Send;

    fn load_existing_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Start background generation; `initial_hint` is the visible window at start time.
    fn start_quality_generation(
        &self,
        paths: Vec<PathBuf>,
        initial_hint: VisibleWindow,
        token: SessionToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Reorder remaining quality work around `visible`. In-flight work is not preempted.
    fn update_priority_hint(
        &self,
        visible: VisibleWindow,
        token: SessionToken,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}
