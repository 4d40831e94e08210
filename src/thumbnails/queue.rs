//! Job board shared by the thumbnail worker threads.
//!
//! - Fast jobs first, then existing-artifact loads, then quality generation
//! - Quality jobs inside the latest visible hint jump the queue
//! - Per-(token, kind) outstanding counts drive the "all complete" events
//! - Cancelled tokens lose their queued jobs and never report completion
//!
//! Tokens come from one allocator, so a session is never live once a newer
//! one has been cancelled. The board keeps only the newest cancelled token.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::session::SessionToken;
use crate::viewport::VisibleWindow;

/// What a worker should do with a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Small in-memory rendition.
    Fast,
    /// Read a high-quality artifact back from the disk cache.
    Existing,
    /// Generate and persist a high-quality artifact.
    Quality,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub token: SessionToken,
    pub kind: JobKind,
    /// Position of the path in the session's folder listing.
    pub index: usize,
    pub path: PathBuf,
}

#[derive(Default)]
struct BoardState {
    fast: VecDeque<Job>,
    existing: VecDeque<Job>,
    quality: VecDeque<Job>,
    /// Folder positions per token, registered by the fast request.
    folders: HashMap<SessionToken, HashMap<PathBuf, usize>>,
    hints: HashMap<SessionToken, VisibleWindow>,
    /// Queued plus in-flight jobs.
    outstanding: HashMap<(SessionToken, JobKind), usize>,
    /// Every token up to and including this one is cancelled.
    cancelled_through: Option<SessionToken>,
    shutdown: bool,
}

impl BoardState {
    fn queue_mut(&mut self, kind: JobKind) -> &mut VecDeque<Job> {
        match kind {
            JobKind::Fast => &mut self.fast,
            JobKind::Existing => &mut self.existing,
            JobKind::Quality => &mut self.quality,
        }
    }

    fn pop(&mut self) -> Option<Job> {
        if let Some(job) = self.fast.pop_front() {
            return Some(job);
        }
        if let Some(job) = self.existing.pop_front() {
            return Some(job);
        }

        let hinted = self
            .quality
            .iter()
            .enumerate()
            .filter(|(_, job)| {
                self.hints
                    .get(&job.token)
                    .is_some_and(|window| window.contains(job.index))
            })
            .min_by_key(|(_, job)| job.index)
            .map(|(pos, _)| pos);

        match hinted {
            Some(pos) => self.quality.remove(pos),
            None => self.quality.pop_front(),
        }
    }

    fn queued(&self) -> usize {
        self.fast.len() + self.existing.len() + self.quality.len()
    }

    fn is_cancelled(&self, token: SessionToken) -> bool {
        self.cancelled_through.is_some_and(|newest| token <= newest)
    }
}

pub struct JobBoard {
    state: Mutex<BoardState>,
    ready: Condvar,
}

impl JobBoard {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BoardState::default()),
            ready: Condvar::new(),
        }
    }

    /// Remember where each path sits in the folder so hints can address them.
    pub fn register_folder(&self, token: SessionToken, paths: &[PathBuf]) {
        let positions = paths
            .iter()
            .enumerate()
            .map(|(index, path)| (path.clone(), index))
            .collect();
        self.state.lock().folders.insert(token, positions);
    }

    /// Queue one job per path. `hint` replaces the token's visible window in
    /// the same critical section so no worker sees the jobs without it.
    ///
    /// Returns the number of jobs queued; nothing is queued for a cancelled
    /// token or after shutdown.
    pub fn submit(
        &self,
        token: SessionToken,
        kind: JobKind,
        paths: Vec<PathBuf>,
        hint: Option<VisibleWindow>,
    ) -> usize {
        let mut state = self.state.lock();
        if state.shutdown || state.is_cancelled(token) {
            trace!(token = %token, ?kind, "Ignoring submission");
            return 0;
        }
        if let Some(window) = hint {
            state.hints.insert(token, window);
        }

        let jobs: Vec<Job> = paths
            .into_iter()
            .enumerate()
            .map(|(position, path)| {
                let index = state
                    .folders
                    .get(&token)
                    .and_then(|folder| folder.get(&path).copied())
                    .unwrap_or(position);
                Job {
                    token,
                    kind,
                    index,
                    path,
                }
            })
            .collect();

        let count = jobs.len();
        *state.outstanding.entry((token, kind)).or_default() += count;
        state.queue_mut(kind).extend(jobs);
        drop(state);

        self.ready.notify_all();
        count
    }

    /// Replace the visible window used to order the token's quality jobs.
    pub fn set_hint(&self, token: SessionToken, window: VisibleWindow) {
        let mut state = self.state.lock();
        if state.is_cancelled(token)
            || !state.outstanding.contains_key(&(token, JobKind::Quality))
        {
            return;
        }
        state.hints.insert(token, window);
    }

    /// Block until a job is available. `None` once the board shuts down.
    pub fn next(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.pop() {
                return Some(job);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Mark `job` done. Returns true when it was the last outstanding job of
    /// its kind for a token that has not been cancelled.
    pub fn finish(&self, job: &Job) -> bool {
        let mut state = self.state.lock();
        let key = (job.token, job.kind);
        let Some(remaining) = state.outstanding.get_mut(&key) else {
            return false;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining > 0 {
            return false;
        }

        state.outstanding.remove(&key);
        if job.kind == JobKind::Quality {
            state.hints.remove(&job.token);
            state.folders.remove(&job.token);
        }
        !state.is_cancelled(job.token)
    }

    /// Drop every queued job of `token` and of older tokens, and refuse
    /// further work for them. Returns true when quality work of `token` was
    /// still outstanding.
    pub fn cancel(&self, token: SessionToken) -> bool {
        let mut state = self.state.lock();
        let before = state.queued();
        for kind in [JobKind::Fast, JobKind::Existing, JobKind::Quality] {
            state.queue_mut(kind).retain(|job| job.token > token);
        }
        let dropped = before - state.queued();

        let quality_outstanding = state
            .outstanding
            .get(&(token, JobKind::Quality))
            .is_some_and(|n| *n > 0);
        state.outstanding.retain(|(t, _), _| *t > token);
        state.hints.retain(|t, _| *t > token);
        state.folders.retain(|t, _| *t > token);
        state.cancelled_through = state.cancelled_through.max(Some(token));

        debug!(token = %token, dropped, quality_outstanding, "Cancelled thumbnail jobs");
        quality_outstanding
    }

    pub fn is_cancelled(&self, token: SessionToken) -> bool {
        self.state.lock().is_cancelled(token)
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.state.lock().queued()
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}
