//! The delivery actor.
//!
//! One task owns the pipeline coordinator, the viewport tracker and the
//! navigator. UI commands, engine events, command outcomes and the viewport
//! debounce timer are multiplexed into it, so every mutation of session state
//! happens in a single event-handling turn. Renderers read the result store
//! and the image cache through a [`ServiceHandle`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::DeliveryConfig;
use crate::coordinator::{CommandOutcome, PipelineCoordinator};
use crate::engine::{EngineEvent, GenerationEngine};
use crate::error::ServiceClosed;
use crate::image_cache::{ImageCache, ImageDecoder};
use crate::navigation::Navigator;
use crate::session::{Phase, SessionToken};
use crate::store::ThumbnailStore;
use crate::viewport::{ViewportGeometry, ViewportTracker};

/// Requests from the UI to the delivery actor.
#[derive(Debug, Clone)]
pub enum ServiceCommand {
    ActivateFolder {
        folder: PathBuf,
        paths: Vec<PathBuf>,
    },
    Cancel,
    Viewport(ViewportGeometry),
    Navigate(usize),
    Shutdown,
}

/// Phase of the active session as last published by the actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub token: Option<SessionToken>,
    pub phase: Option<Phase>,
    /// Existing high-quality artifacts are still being loaded.
    pub existing_loading: bool,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_some_and(Phase::is_terminal)
    }

    /// Terminal, with no existing-artifact load still landing results.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() && !self.existing_loading
    }
}

/// Cloneable UI-side handle to a running [`DeliveryService`].
pub struct ServiceHandle<D: ImageDecoder> {
    commands: flume::Sender<ServiceCommand>,
    status: watch::Receiver<SessionStatus>,
    store: Arc<ThumbnailStore>,
    cache: ImageCache<D>,
}

impl<D: ImageDecoder> Clone for ServiceHandle<D> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
        }
    }
}

impl<D: ImageDecoder> ServiceHandle<D> {
    fn send(&self, command: ServiceCommand) -> Result<(), ServiceClosed> {
        self.commands.send(command).map_err(|_| ServiceClosed)
    }

    pub fn activate_folder(&self, folder: PathBuf, paths: Vec<PathBuf>) -> Result<(), ServiceClosed> {
        self.send(ServiceCommand::ActivateFolder { folder, paths })
    }

    pub fn cancel(&self) -> Result<(), ServiceClosed> {
        self.send(ServiceCommand::Cancel)
    }

    /// Report a scroll or resize of the filmstrip.
    pub fn viewport(&self, geometry: ViewportGeometry) -> Result<(), ServiceClosed> {
        self.send(ServiceCommand::Viewport(geometry))
    }

    pub fn navigate(&self, index: usize) -> Result<(), ServiceClosed> {
        self.send(ServiceCommand::Navigate(index))
    }

    pub fn shutdown(&self) -> Result<(), ServiceClosed> {
        self.send(ServiceCommand::Shutdown)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Wait until the published status satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionStatus) -> bool,
    ) -> Result<SessionStatus, ServiceClosed> {
        let mut status = self.status.clone();
        let status = status.wait_for(predicate).await.map_err(|_| ServiceClosed)?;
        Ok(*status)
    }

    pub fn store(&self) -> &Arc<ThumbnailStore> {
        &self.store
    }

    pub fn image_cache(&self) -> &ImageCache<D> {
        &self.cache
    }
}

pub struct DeliveryService<E: GenerationEngine, D: ImageDecoder> {
    coordinator: PipelineCoordinator<E>,
    tracker: ViewportTracker,
    navigator: Navigator<D>,
    commands: flume::Receiver<ServiceCommand>,
    events: flume::Receiver<EngineEvent>,
    outcomes: flume::Receiver<CommandOutcome>,
    status: watch::Sender<SessionStatus>,
}

impl<E: GenerationEngine, D: ImageDecoder> DeliveryService<E, D> {
    pub fn new(engine: Arc<E>, decoder: Arc<D>, config: &DeliveryConfig) -> (Self, ServiceHandle<D>) {
        let (command_tx, commands) = flume::unbounded();
        let (event_tx, events) = flume::unbounded();
        let (outcome_tx, outcomes) = flume::unbounded();
        let (status, status_rx) = watch::channel(SessionStatus::default());

        let store = Arc::new(ThumbnailStore::new());
        let cache = ImageCache::new(decoder, config.cache_capacity);

        let service = Self {
            coordinator: PipelineCoordinator::new(engine, Arc::clone(&store), event_tx, outcome_tx),
            tracker: ViewportTracker::new(config.debounce),
            navigator: Navigator::new(cache.clone(), config.preload_behind, config.preload_ahead),
            commands,
            events,
            outcomes,
            status,
        };
        let handle = ServiceHandle {
            commands: command_tx,
            status: status_rx,
            store,
            cache,
        };
        (service, handle)
    }

    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process messages until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Delivery service started");
        loop {
            let deadline = self.tracker.deadline().map(Instant::from_std);
            tokio::select! {
                command = self.commands.recv_async() => match command {
                    Ok(ServiceCommand::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                Ok(event) = self.events.recv_async() => self.coordinator.on_engine_event(event),
                Ok(outcome) = self.outcomes.recv_async() => self.coordinator.on_command_outcome(outcome),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_viewport();
                }
            }
            self.publish_status();
        }

        if self.coordinator.cancel() {
            info!("Cancelled active session on shutdown");
        }
        let stats = self.coordinator.stats();
        debug!(?stats, "Delivery service stopped");
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::ActivateFolder { folder, paths } => {
                self.tracker.reset();
                self.navigator.reset(paths.clone());
                self.coordinator.activate(folder, paths);
            }
            ServiceCommand::Cancel => {
                self.coordinator.cancel();
            }
            ServiceCommand::Viewport(geometry) => {
                self.tracker.observe(geometry, Instant::now().into_std());
            }
            ServiceCommand::Navigate(index) => {
                // Runs detached; the navigation itself never waits on decoding.
                let _ = self.navigator.navigate(index);
            }
            ServiceCommand::Shutdown => {}
        }
    }

    fn flush_viewport(&mut self) {
        if let Some(window) = self.tracker.poll(Instant::now().into_std()) {
            self.coordinator.on_visible_window(window);
        }
    }

    fn publish_status(&self) {
        let next = SessionStatus {
            token: self.coordinator.active_token(),
            phase: self.coordinator.phase(),
            existing_loading: self
                .coordinator
                .session()
                .is_some_and(|session| session.existing_loading()),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
