use std::time::Duration;

use dashmap::DashMap;

use super::{CacheEntry, CacheHandle, CacheKey, SweepReport, plan_sweep};
use crate::{Result, ValidationResult, time::timestamp};

/// Process-local cache backed by a [`DashMap`]
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prepared entry as-is
    pub fn insert(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }
}

impl CacheHandle for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &CacheKey, value: &ValidationResult, ttl: Duration) -> Result<()> {
        self.insert(CacheEntry::new(key.clone(), value.clone(), ttl));
        Ok(())
    }

    fn sweep(&self, max_entries: usize) -> Result<SweepReport> {
        let now = timestamp();
        let snapshot = self
            .entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.stored_at, entry.is_fresh_at(now)))
            .collect();
        let (doomed, report) = plan_sweep(snapshot, max_entries);
        for key in doomed {
            self.entries.remove(&key);
        }
        Ok(report)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A cache that stores nothing: every lookup is a miss
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheHandle for NoCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _value: &ValidationResult, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    fn sweep(&self, _max_entries: usize) -> Result<SweepReport> {
        Ok(SweepReport::default())
    }

    fn len(&self) -> usize {
        0
    }
}
