//! Best-known thumbnail per path for the current folder.
//!
//! Written only by the pipeline coordinator, read by the renderer at any time.
//! Writes are monotonic per path: a record is only replaced by a strictly
//! better tier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::trace;

use crate::models::{ThumbnailRecord, Tier};

#[derive(Debug, Default)]
pub struct ThumbnailStore {
    records: RwLock<HashMap<PathBuf, ThumbnailRecord>>,
}

impl ThumbnailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `record` unless a record of the same or better tier is already present.
    ///
    /// Returns true when the store changed.
    pub fn upsert(&self, record: ThumbnailRecord) -> bool {
        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.path) {
            if existing.tier >= record.tier {
                trace!(path = ?record.path, current = ?existing.tier, incoming = ?record.tier, "Skipping non-upgrade");
                return false;
            }
        }
        records.insert(record.path.clone(), record);
        true
    }

    pub fn get(&self, path: &Path) -> Option<ThumbnailRecord> {
        self.records.read().get(path).cloned()
    }

    pub fn tier_of(&self, path: &Path) -> Option<Tier> {
        self.records.read().get(path).map(|r| r.tier)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of records per tier, in tier order.
    pub fn tier_counts(&self) -> Vec<(Tier, usize)> {
        let records = self.records.read();
        [Tier::Fast, Tier::CacheHit, Tier::Dct]
            .into_iter()
            .map(|tier| (tier, records.values().filter(|r| r.tier == tier).count()))
            .collect()
    }

    /// Copy of every record, for renderers that want a consistent view.
    pub fn snapshot(&self) -> Vec<ThumbnailRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}
