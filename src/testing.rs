//! Recording collaborators for unit tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{EngineEvent, EventSink, GenerationEngine, QualityPartition};
use crate::error::{EngineCommand, EngineError};
use crate::models::{PixelPayload, ThumbnailRecord, Tier};
use crate::session::{SessionToken, Subscription};
use crate::viewport::VisibleWindow;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartFast(Vec<PathBuf>, SessionToken),
    Cancel(SessionToken),
    Classify(Vec<PathBuf>, SessionToken),
    LoadExisting(Vec<PathBuf>, SessionToken),
    StartQuality(Vec<PathBuf>, Vec<usize>, SessionToken),
    Hint(Vec<usize>, SessionToken),
}

/// Engine that records every command and answers immediately.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    partition: Mutex<QualityPartition>,
    failing: Mutex<HashSet<EngineCommand>>,
    latent: Mutex<HashSet<EngineCommand>>,
    routes: Arc<Mutex<Vec<(SessionToken, EventSink)>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(self, existing: &[&str], missing: &[&str]) -> Self {
        *self.partition.lock() = QualityPartition {
            existing: existing.iter().map(PathBuf::from).collect(),
            missing: missing.iter().map(PathBuf::from).collect(),
        };
        self
    }

    pub fn failing(self, command: EngineCommand) -> Self {
        self.failing.lock().insert(command);
        self
    }

    /// Make `command` yield to the scheduler once before it is recorded.
    pub fn latent(self, command: EngineCommand) -> Self {
        self.latent.lock().insert(command);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    pub fn live_subscriptions(&self) -> Vec<SessionToken> {
        self.routes.lock().iter().map(|(t, _)| *t).collect()
    }

    /// Push an event through the subscription registered for its token, if any.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let routes = self.routes.lock();
        match routes.iter().find(|(t, _)| *t == event.token()) {
            Some((_, sink)) => sink.send(event).is_ok(),
            None => false,
        }
    }

    async fn pause(&self, command: EngineCommand) {
        let latent = self.latent.lock().contains(&command);
        if latent {
            tokio::task::yield_now().await;
        }
    }

    fn record(&self, call: Call, command: EngineCommand) -> Result<(), EngineError> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(&command) {
            Err(EngineError::Command(format!("{command} rejected")))
        } else {
            Ok(())
        }
    }
}

impl GenerationEngine for MockEngine {
    fn subscribe(&self, token: SessionToken, sink: EventSink) -> Subscription {
        self.routes.lock().push((token, sink));
        let routes = Arc::clone(&self.routes);
        Subscription::new(token, move || routes.lock().retain(|(t, _)| *t != token))
    }

    async fn start_fast_generation(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.pause(EngineCommand::StartFast).await;
        self.record(Call::StartFast(paths, token), EngineCommand::StartFast)
    }

    async fn cancel_generation(&self, token: SessionToken) -> Result<(), EngineError> {
        self.pause(EngineCommand::Cancel).await;
        self.record(Call::Cancel(token), EngineCommand::Cancel)
    }

    async fn classify_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<QualityPartition, EngineError> {
        self.pause(EngineCommand::Classify).await;
        self.record(Call::Classify(paths, token), EngineCommand::Classify)?;
        Ok(self.partition.lock().clone())
    }

    async fn load_existing_quality_tier(
        &self,
        paths: Vec<PathBuf>,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.pause(EngineCommand::LoadExisting).await;
        self.record(Call::LoadExisting(paths, token), EngineCommand::LoadExisting)
    }

    async fn start_quality_generation(
        &self,
        paths: Vec<PathBuf>,
        initial_hint: VisibleWindow,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.pause(EngineCommand::StartQuality).await;
        self.record(
            Call::StartQuality(paths, initial_hint.to_vec(), token),
            EngineCommand::StartQuality,
        )
    }

    async fn update_priority_hint(
        &self,
        visible: VisibleWindow,
        token: SessionToken,
    ) -> Result<(), EngineError> {
        self.pause(EngineCommand::PriorityHint).await;
        self.record(Call::Hint(visible.to_vec(), token), EngineCommand::PriorityHint)
    }
}

pub fn record(path: &str, tier: Tier) -> ThumbnailRecord {
    ThumbnailRecord::new(path.into(), PixelPayload::new(vec![0; 4]), 1, 1, tier)
}

pub fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}
