//! Two-phase thumbnail pipeline coordinator.
//!
//! One [`Session`] per active folder is driven through
//! `FastGenerating → Classifying → (ExistingLoading ∥ HqGenerating) → HqCompleted`.
//! Engine commands for a session go through one ordered lane, so the engine
//! sees them in issue order. Their results come back as [`CommandOutcome`]s
//! and, like engine events, are dropped when their token no longer names the
//! active session. Handlers never wait on the engine.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::engine::{EngineEvent, EventSink, GenerationEngine, QualityPartition};
use crate::error::{DeliveryError, EngineCommand, EngineError};
use crate::session::{Phase, Session, SessionToken, TokenAllocator};
use crate::store::ThumbnailStore;
use crate::viewport::VisibleWindow;

/// Result of an engine command, delivered back to the coordinator.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    FastStarted {
        token: SessionToken,
        result: Result<(), EngineError>,
    },
    Classified {
        token: SessionToken,
        result: Result<QualityPartition, EngineError>,
    },
    ExistingLoadStarted {
        token: SessionToken,
        result: Result<(), EngineError>,
    },
    QualityStarted {
        token: SessionToken,
        result: Result<(), EngineError>,
    },
    CancelAcked {
        token: SessionToken,
        result: Result<(), EngineError>,
    },
    HintSent {
        token: SessionToken,
        result: Result<(), EngineError>,
    },
}

impl CommandOutcome {
    pub fn token(&self) -> SessionToken {
        match self {
            CommandOutcome::FastStarted { token, .. }
            | CommandOutcome::Classified { token, .. }
            | CommandOutcome::ExistingLoadStarted { token, .. }
            | CommandOutcome::QualityStarted { token, .. }
            | CommandOutcome::CancelAcked { token, .. }
            | CommandOutcome::HintSent { token, .. } => *token,
        }
    }
}

/// Counters for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub stale_events: u64,
    pub stale_outcomes: u64,
    pub records_applied: u64,
    pub hints_sent: u64,
}

type Command = Pin<Box<dyn Future<Output = CommandOutcome> + Send>>;

/// Ordered command queue for one session.
///
/// A single task awaits each command before starting the next and forwards
/// its outcome. Dropping the lane lets queued commands drain, then the task exits.
struct CommandLane {
    token: SessionToken,
    queue: flume::Sender<Command>,
}

impl CommandLane {
    fn open(token: SessionToken, outcomes: &flume::Sender<CommandOutcome>) -> Self {
        let (queue, commands) = flume::unbounded::<Command>();
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            while let Ok(command) = commands.recv_async().await {
                let outcome = command.await;
                // A closed channel means the service is shutting down.
                if outcomes.send(outcome).is_err() {
                    break;
                }
            }
            trace!(token = %token, "Command lane closed");
        });
        Self { token, queue }
    }

    fn push(&self, command: impl Future<Output = CommandOutcome> + Send + 'static) {
        if self.queue.send(Box::pin(command)).is_err() {
            debug!(token = %self.token, "Command lane gone; dropping command");
        }
    }

    fn cancel<E: GenerationEngine>(&self, engine: &Arc<E>) {
        let engine = Arc::clone(engine);
        let token = self.token;
        self.push(async move {
            let result = engine.cancel_generation(token).await;
            CommandOutcome::CancelAcked { token, result }
        });
    }
}

fn abort_phase(session: &mut Session, command: EngineCommand, source: EngineError) {
    let err = DeliveryError::from_engine(command, source);
    if matches!(err, DeliveryError::ClassificationFailure(_)) {
        warn!(token = %session.token(), error = %err, "Classification failed; high-quality thumbnails disabled for this folder");
    } else {
        warn!(token = %session.token(), error = %err, "Engine command failed");
    }
    if !session.phase().is_terminal() {
        session.transition(Phase::HqCancelled);
    }
}

pub struct PipelineCoordinator<E: GenerationEngine> {
    engine: Arc<E>,
    tokens: TokenAllocator,
    session: Option<Session>,
    lane: Option<CommandLane>,
    store: Arc<ThumbnailStore>,
    window: VisibleWindow,
    events: EventSink,
    outcomes: flume::Sender<CommandOutcome>,
    stats: CoordinatorStats,
}

impl<E: GenerationEngine> PipelineCoordinator<E> {
    /// `events` is subscribed with the engine for every session; `outcomes`
    /// receives the results of engine commands.
    pub fn new(
        engine: Arc<E>,
        store: Arc<ThumbnailStore>,
        events: EventSink,
        outcomes: flume::Sender<CommandOutcome>,
    ) -> Self {
        Self {
            engine,
            tokens: TokenAllocator::new(),
            session: None,
            lane: None,
            store,
            window: VisibleWindow::empty(),
            events,
            outcomes,
            stats: CoordinatorStats::default(),
        }
    }

    pub fn store(&self) -> &Arc<ThumbnailStore> {
        &self.store
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(Session::phase)
    }

    pub fn active_token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(Session::token)
    }

    pub fn window(&self) -> &VisibleWindow {
        &self.window
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Start a session for `folder`, superseding any active one.
    pub fn activate(&mut self, folder: PathBuf, paths: Vec<PathBuf>) -> SessionToken {
        self.supersede();
        self.store.clear();
        self.window = VisibleWindow::empty();

        let token = self.tokens.next();
        let mut session = Session::new(token, folder, paths);
        info!(token = %token, folder = ?session.folder(), items = session.paths().len(), "Activating folder");

        if session.paths().is_empty() {
            session.transition(Phase::HqCompleted);
            self.session = Some(session);
            return token;
        }

        session.attach(self.engine.subscribe(token, self.events.clone()));
        session.transition(Phase::FastGenerating);

        let lane = CommandLane::open(token, &self.outcomes);
        let engine = Arc::clone(&self.engine);
        let paths = session.paths().to_vec();
        lane.push(async move {
            let result = engine.start_fast_generation(paths, token).await;
            CommandOutcome::FastStarted { token, result }
        });

        self.lane = Some(lane);
        self.session = Some(session);
        token
    }

    /// Cancel the active session's background work. Returns false when there
    /// was nothing left to cancel.
    pub fn cancel(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.phase().is_terminal() {
            return false;
        }
        session.transition(Phase::HqCancelled);
        if let Some(lane) = &self.lane {
            lane.cancel(&self.engine);
        }
        true
    }

    fn supersede(&mut self) {
        let Some(mut old) = self.session.take() else {
            return;
        };
        if !old.phase().is_terminal() {
            old.transition(Phase::HqCancelled);
        }
        // Empty folders never open a lane.
        if let Some(lane) = self.lane.take() {
            lane.cancel(&self.engine);
        }
        debug!(token = %old.token(), "Session superseded");
        // Dropping `old` releases its engine subscription.
    }

    /// Apply an engine event if it belongs to the active session.
    pub fn on_engine_event(&mut self, event: EngineEvent) {
        let token = event.token();
        let Some(session) = self.session.as_mut().filter(|s| s.is_current(token)) else {
            trace!(token = %token, "Dropping event from stale session");
            self.stats.stale_events += 1;
            return;
        };

        match event {
            EngineEvent::FastReady { record, .. } => {
                if record.tier.is_quality() {
                    warn!(path = ?record.path, tier = ?record.tier, "Quality record on fast channel");
                    return;
                }
                if self.store.upsert(record) {
                    self.stats.records_applied += 1;
                }
            }
            EngineEvent::QualityReady { record, .. } => {
                if !record.tier.is_quality() {
                    warn!(path = ?record.path, "Fast record on quality channel");
                    return;
                }
                if self.store.upsert(record) {
                    self.stats.records_applied += 1;
                }
            }
            EngineEvent::FastAllComplete { .. } => {
                if session.phase() != Phase::FastGenerating {
                    debug!(token = %token, phase = ?session.phase(), "Ignoring fast-tier completion");
                    return;
                }
                session.transition(Phase::Classifying);
                let Some(lane) = &self.lane else {
                    return;
                };
                let engine = Arc::clone(&self.engine);
                let paths = session.paths().to_vec();
                lane.push(async move {
                    let result = engine.classify_quality_tier(paths, token).await;
                    CommandOutcome::Classified { token, result }
                });
            }
            EngineEvent::ExistingLoaded { .. } => {
                session.set_existing_loading(false);
                debug!(token = %token, "Existing high-quality thumbnails loaded");
            }
            EngineEvent::QualityAllComplete { .. } => {
                if session.phase() == Phase::HqGenerating {
                    session.transition(Phase::HqCompleted);
                    info!(token = %token, "High-quality generation complete");
                }
            }
            EngineEvent::QualityCancelled { .. } => {
                if session.phase() == Phase::HqGenerating {
                    session.transition(Phase::HqCancelled);
                }
            }
        }
    }

    /// Apply the result of an engine command.
    pub fn on_command_outcome(&mut self, outcome: CommandOutcome) {
        match &outcome {
            CommandOutcome::CancelAcked { token, result } => {
                match result {
                    Ok(()) => debug!(token = %token, "Cancellation acknowledged"),
                    Err(e) => debug!(token = %token, error = %e, "Cancellation failed; ignoring"),
                }
                return;
            }
            CommandOutcome::HintSent { token, result } => {
                if let Err(e) = result {
                    debug!(token = %token, error = %e, "Priority hint rejected");
                }
                return;
            }
            _ => {}
        }

        let token = outcome.token();
        let (Some(session), Some(lane)) = (
            self.session.as_mut().filter(|s| s.is_current(token)),
            self.lane.as_ref(),
        ) else {
            trace!(token = %token, "Dropping outcome from stale session");
            self.stats.stale_outcomes += 1;
            return;
        };

        match outcome {
            CommandOutcome::FastStarted { result, .. } => match result {
                Ok(()) => trace!(token = %token, "Fast-tier generation started"),
                Err(e) => abort_phase(session, EngineCommand::StartFast, e),
            },
            CommandOutcome::Classified { result, .. } => {
                if session.phase() != Phase::Classifying {
                    debug!(token = %token, phase = ?session.phase(), "Ignoring late classification");
                    return;
                }
                match result {
                    Ok(partition) => {
                        let engine = Arc::clone(&self.engine);
                        Self::apply_partition(session, partition, engine, &self.window, lane);
                    }
                    Err(e) => abort_phase(session, EngineCommand::Classify, e),
                }
            }
            CommandOutcome::ExistingLoadStarted { result, .. } => {
                if let Err(e) = result {
                    session.set_existing_loading(false);
                    if session.phase() == Phase::HqGenerating {
                        lane.cancel(&self.engine);
                    }
                    abort_phase(session, EngineCommand::LoadExisting, e);
                }
            }
            CommandOutcome::QualityStarted { result, .. } => match result {
                Ok(()) => trace!(token = %token, "Quality generation started"),
                Err(e) => abort_phase(session, EngineCommand::StartQuality, e),
            },
            CommandOutcome::CancelAcked { .. } | CommandOutcome::HintSent { .. } => {}
        }
    }

    fn apply_partition(
        session: &mut Session,
        partition: QualityPartition,
        engine: Arc<E>,
        window: &VisibleWindow,
        lane: &CommandLane,
    ) {
        let token = session.token();
        let QualityPartition { existing, missing } = partition;
        info!(token = %token, existing = existing.len(), missing = missing.len(), "Classified high-quality thumbnails");

        if !existing.is_empty() {
            session.transition(Phase::ExistingLoading);
            session.set_existing_loading(true);
            let engine = Arc::clone(&engine);
            lane.push(async move {
                let result = engine.load_existing_quality_tier(existing, token).await;
                CommandOutcome::ExistingLoadStarted { token, result }
            });
        }

        if missing.is_empty() {
            session.transition(Phase::HqCompleted);
            return;
        }

        session.transition(Phase::HqGenerating);
        let hint = window.clone();
        lane.push(async move {
            let result = engine.start_quality_generation(missing, hint, token).await;
            CommandOutcome::QualityStarted { token, result }
        });
    }

    /// Record the latest visible window and forward it as a priority hint
    /// while quality generation runs. Returns true when a hint was sent.
    pub fn on_visible_window(&mut self, window: VisibleWindow) -> bool {
        self.window = window;
        let (Some(session), Some(lane)) = (self.session.as_ref(), self.lane.as_ref()) else {
            return false;
        };
        if session.phase() != Phase::HqGenerating || self.window.is_empty() {
            return false;
        }

        let token = session.token();
        let engine = Arc::clone(&self.engine);
        let visible = self.window.clone();
        lane.push(async move {
            let result = engine.update_priority_hint(visible, token).await;
            CommandOutcome::HintSent { token, result }
        });
        self.stats.hints_sent += 1;
        true
    }
}
