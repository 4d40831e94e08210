//! Local thumbnail engine.
//!
//! This module provides:
//! - `ThumbnailGenerator` - Fast and high-quality renditions from source images
//! - `ThumbnailCache` - Disk cache of high-quality artifacts
//! - `JobBoard` - Prioritised work shared by the worker threads
//! - `LocalEngine` - `GenerationEngine` implementation on top of the above

pub mod cache;
pub mod engine;
pub mod generator;
pub mod queue;

pub use cache::ThumbnailCache;
pub use engine::LocalEngine;
