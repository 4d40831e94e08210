//! Error types shared by the delivery core and its collaborators.
//!
//! Nothing in here is fatal. Every variant degrades a session (missing
//! high-quality thumbnails, a missing cached handle) and is logged where it
//! is observed.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a generation engine for a single command.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The engine accepted the command but could not carry it out.
    #[error("engine command failed: {0}")]
    Command(String),
    /// The engine is gone (shut down, channel closed).
    #[error("generation engine unavailable")]
    Unavailable,
}

/// An individual image could not be decoded.
#[derive(Debug, Clone, Error)]
#[error("failed to decode {path:?}: {message}")]
pub struct DecodeError {
    pub path: PathBuf,
    pub message: String,
}

impl DecodeError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Engine commands issued by the pipeline coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCommand {
    StartFast,
    Cancel,
    Classify,
    LoadExisting,
    StartQuality,
    PriorityHint,
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineCommand::StartFast => "start_fast_generation",
            EngineCommand::Cancel => "cancel_generation",
            EngineCommand::Classify => "classify_quality_tier",
            EngineCommand::LoadExisting => "load_existing_quality_tier",
            EngineCommand::StartQuality => "start_quality_generation",
            EngineCommand::PriorityHint => "update_priority_hint",
        };
        f.write_str(name)
    }
}

/// Failure taxonomy of the delivery core.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("{command} failed: {source}")]
    EngineCommandFailure {
        command: EngineCommand,
        #[source]
        source: EngineError,
    },
    #[error("quality tier classification failed: {0}")]
    ClassificationFailure(#[source] EngineError),
    #[error(transparent)]
    DecodeFailure(#[from] DecodeError),
}

impl DeliveryError {
    /// Wrap an engine failure for `command`. Classification gets its own class.
    pub fn from_engine(command: EngineCommand, source: EngineError) -> Self {
        match command {
            EngineCommand::Classify => DeliveryError::ClassificationFailure(source),
            command => DeliveryError::EngineCommandFailure { command, source },
        }
    }
}

/// The delivery service task has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("delivery service has shut down")]
pub struct ServiceClosed;
