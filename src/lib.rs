//! Progressive media delivery for large image folders.
//!
//! Thumbnails arrive in two phases: a fast low-fidelity pass for the whole
//! folder, then a high-quality pass that reuses cached artifacts and
//! generates the rest, visible items first. Full-resolution images are kept
//! in a bounded LRU cache and preloaded around the viewer's position.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod image_cache;
pub mod image_loader;
pub mod models;
pub mod navigation;
pub mod scanner;
pub mod service;
pub mod session;
pub mod store;
pub mod thumbnails;
pub mod viewport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DeliveryConfig;
pub use coordinator::PipelineCoordinator;
pub use engine::{EngineEvent, GenerationEngine, QualityPartition};
pub use error::{DecodeError, DeliveryError, EngineError};
pub use image_cache::{ImageCache, ImageDecoder};
pub use image_loader::FileDecoder;
pub use models::{ThumbnailRecord, Tier};
pub use service::{DeliveryService, ServiceHandle, SessionStatus};
pub use session::{Phase, SessionToken};
pub use store::ThumbnailStore;
pub use thumbnails::LocalEngine;
pub use viewport::{ViewportGeometry, VisibleWindow};
