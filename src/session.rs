//! Folder sessions: tokens, phases and scoped event subscriptions.
//!
//! Every folder activation gets a fresh [`SessionToken`]. Anything that comes
//! back asynchronously (engine events, command outcomes) carries the token it
//! was issued under and is dropped unless it matches the active session.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one folder activation. Strictly increasing per allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mints session tokens. The first token is `1`.
#[derive(Debug, Default)]
pub struct TokenAllocator {
    last: AtomicU64,
}

impl TokenAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> SessionToken {
        SessionToken(self.last.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// The most recently issued token, if any.
    pub fn current(&self) -> Option<SessionToken> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            raw => Some(SessionToken(raw)),
        }
    }
}

/// Pipeline phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    FastGenerating,
    Classifying,
    ExistingLoading,
    HqGenerating,
    HqCancelled,
    HqCompleted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::HqCancelled | Phase::HqCompleted)
    }
}

/// Registration of an event sink with a generation engine.
///
/// Dropping it unregisters the sink. The coordinator keeps exactly one alive,
/// owned by the active [`Session`], so superseding a session releases the old
/// registration deterministically.
#[must_use = "dropping a subscription unregisters it immediately"]
pub struct Subscription {
    token: SessionToken,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(token: SessionToken, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            token,
            release: Some(Box::new(release)),
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("live", &self.release.is_some())
            .finish()
    }
}

/// The unit of work for one active folder.
#[derive(Debug)]
pub struct Session {
    token: SessionToken,
    folder: PathBuf,
    paths: Vec<PathBuf>,
    phase: Phase,
    /// An existing-artifact load has been issued and not yet reported done.
    existing_loading: bool,
    subscription: Option<Subscription>,
}

impl Session {
    pub fn new(token: SessionToken, folder: PathBuf, paths: Vec<PathBuf>) -> Self {
        Self {
            token,
            folder,
            paths,
            phase: Phase::Idle,
            existing_loading: false,
            subscription: None,
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn folder(&self) -> &PathBuf {
        &self.folder
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_current(&self, token: SessionToken) -> bool {
        self.token == token
    }

    pub fn existing_loading(&self) -> bool {
        self.existing_loading
    }

    pub(crate) fn set_existing_loading(&mut self, loading: bool) {
        self.existing_loading = loading;
    }

    pub(crate) fn attach(&mut self, subscription: Subscription) {
        self.subscription = Some(subscription);
    }

    /// Move to `next`, returning the previous phase.
    pub(crate) fn transition(&mut self, next: Phase) -> Phase {
        let prev = self.phase;
        if prev != next {
            tracing::debug!(token = %self.token, from = ?prev, to = ?next, "Session phase change");
        }
        self.phase = next;
        prev
    }
}
