//! Persistent, expiring storage of [`ValidationResult`]s.
//!
//! Entries are keyed by a hash of the normalized URL and carry the TTL they
//! were written with, so that processes using different TTLs still agree on
//! what is fresh. Three handles implement [`CacheHandle`]:
//!
//! - [`DiskCache`]: one JSON file per key, shared between processes
//! - [`MemoryCache`]: process-local, for long-running callers and tests
//! - [`NoCache`]: never stores anything

mod disk;
mod memory;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    Result, ValidationResult,
    time::{Timestamp, timestamp},
};

pub use disk::DiskCache;
pub use memory::{MemoryCache, NoCache};

/// Version of the on-disk entry format.
///
/// Bumped only for incompatible changes; additive changes rely on serde
/// defaults instead.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Hex encoded SHA-256 of a normalized URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a parsed URL.
    ///
    /// Scheme and host are already lowercased by URL parsing. The fragment is
    /// ignored because it never reaches the server.
    #[must_use]
    pub fn for_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self::digest(url.as_str())
    }

    /// Derive the key for raw input which may not parse as a URL
    #[must_use]
    pub fn for_raw(raw: &str) -> Self {
        let raw = raw.trim();
        match Url::parse(raw) {
            Ok(url) => Self::for_url(&url),
            Err(_) => Self::digest(raw),
        }
    }

    fn digest(input: &str) -> Self {
        Self(hex::encode(Sha256::digest(input.as_bytes())))
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an existing key, e.g. a file stem found in a cache directory.
    ///
    /// Returns `None` unless the input looks like a SHA-256 hex digest.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let valid = input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(input.to_ascii_lowercase()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored [`ValidationResult`] together with its expiry information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Entry format version, see [`CACHE_FORMAT_VERSION`]
    #[serde(default = "default_version")]
    pub version: u32,
    /// The key this entry is stored under
    pub key: CacheKey,
    /// The cached result
    pub value: ValidationResult,
    /// When the entry was written
    pub stored_at: Timestamp,
    /// How long the entry stays fresh after `stored_at`
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

const fn default_version() -> u32 {
    CACHE_FORMAT_VERSION
}

impl CacheEntry {
    /// Create an entry stored now
    #[must_use]
    pub fn new(key: CacheKey, value: ValidationResult, ttl: Duration) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            key,
            value,
            stored_at: timestamp(),
            ttl,
        }
    }

    /// Whether the entry is still fresh
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(timestamp())
    }

    /// Whether the entry is fresh at `now`: `now - stored_at < ttl`
    #[must_use]
    pub fn is_fresh_at(&self, now: Timestamp) -> bool {
        Duration::from_secs(now.saturating_sub(self.stored_at)) < self.ttl
    }
}

/// What a [`CacheHandle::sweep`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries removed because their TTL had run out
    pub expired: usize,
    /// Fresh entries removed to respect the size bound
    pub evicted: usize,
    /// Entries left afterwards
    pub remaining: usize,
}

/// Access to a result cache.
///
/// Implementations must be safe to share between the workers of a batch.
/// Only full overwrites are supported, so a concurrent reader always sees
/// either the previous or the new entry of a key.
pub trait CacheHandle: Send + Sync + fmt::Debug {
    /// Look up the entry for `key`, fresh or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium fails in a way that is not equivalent
    /// to the entry being absent.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded or committed.
    fn put(&self, key: &CacheKey, value: &ValidationResult, ttl: Duration) -> Result<()>;

    /// Remove stale entries, then the oldest fresh ones until at most
    /// `max_entries` remain.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be listed or locked.
    fn sweep(&self, max_entries: usize) -> Result<SweepReport>;

    /// Number of stored entries, fresh or stale
    fn len(&self) -> usize;

    /// Whether nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decide which keys a sweep removes.
///
/// Takes `(key, stored_at, fresh)` triples and returns the keys to delete
/// together with the resulting report.
pub(crate) fn plan_sweep(
    mut entries: Vec<(CacheKey, Timestamp, bool)>,
    max_entries: usize,
) -> (Vec<CacheKey>, SweepReport) {
    let mut doomed = Vec::new();
    entries.retain(|(key, _, fresh)| {
        if !fresh {
            doomed.push(key.clone());
        }
        *fresh
    });
    let expired = doomed.len();

    let mut evicted = 0;
    if entries.len() > max_entries {
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        evicted = entries.len() - max_entries;
        doomed.extend(entries.drain(..evicted).map(|(key, _, _)| key));
    }

    let report = SweepReport {
        expired,
        evicted,
        remaining: entries.len(),
    };
    (doomed, report)
}
