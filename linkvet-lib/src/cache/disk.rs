use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use super::{CacheEntry, CacheHandle, CacheKey, SweepReport, plan_sweep};
use crate::{
    Error, Result, ValidationResult,
    time::{Timestamp, timestamp},
};

/// File used for the advisory lock held while sweeping
const LOCK_FILE: &str = ".lock";

/// Extension of committed entries
const ENTRY_EXTENSION: &str = "json";

/// A cache directory holding one JSON file per key.
///
/// Several processes may use the same directory at once. Writes go to a
/// temporary file in the directory which is then renamed over the entry, so
/// readers never observe a partially written entry and need no lock. Sweeps
/// hold an exclusive advisory lock on [`LOCK_FILE`] for the whole
/// read-modify-write cycle.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (and create if needed) a cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheUnavailable`] if the directory cannot be created
    /// or is not writable.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::CacheUnavailable(dir.clone(), e))?;
        // Creating a file is the only portable writability check
        NamedTempFile::new_in(&dir).map_err(|e| Error::CacheUnavailable(dir.clone(), e))?;
        Ok(Self { dir })
    }

    /// The directory this cache lives in
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked or listed.
    pub fn clear(&self) -> Result<usize> {
        let _lock = self.lock()?;
        let keys = self.keys()?;
        let mut removed = 0;
        for key in &keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        info!("Cleared {removed} entries from cache at {}", self.dir.display());
        Ok(removed)
    }

    /// Write a prepared entry, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded or committed.
    pub fn store(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(&entry.key);
        let bytes = serde_json::to_vec(entry).map_err(|e| Error::CacheFormat(path.clone(), e))?;

        let mut file =
            NamedTempFile::new_in(&self.dir).map_err(|e| Error::CacheUnavailable(path.clone(), e))?;
        file.write_all(&bytes)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| Error::CacheUnavailable(path.clone(), e))?;
        file.persist(&path)
            .map_err(|e| Error::CacheUnavailable(path.clone(), e.error))?;
        Ok(())
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    /// Take the exclusive advisory lock, blocking until it is available.
    /// The lock is released when the returned file is dropped.
    fn lock(&self) -> Result<File> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::CacheUnavailable(path.clone(), e))?;
        file.lock().map_err(|e| Error::CacheIo(path, e))?;
        Ok(file)
    }

    /// Keys of all committed entries. Temporary files and the lock file are
    /// skipped.
    fn keys(&self) -> Result<Vec<CacheKey>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| Error::CacheIo(self.dir.clone(), e))?;
        let mut keys = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry.map_err(|e| Error::CacheIo(self.dir.clone(), e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(CacheKey::parse)
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Read an entry, distinguishing "absent" from "corrupt"
    fn read(&self, key: &CacheKey) -> io::Result<Option<Result<CacheEntry>>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(
            serde_json::from_slice(&bytes).map_err(|e| Error::CacheFormat(path, e)),
        ))
    }

    /// Remove the entry for `key` unless it was rewritten since it was seen
    /// with `seen_stored_at`. Writers take no lock, so a sweep must not
    /// trust its snapshot.
    fn remove_unless_rewritten(&self, key: &CacheKey, seen_stored_at: Timestamp) -> Result<bool> {
        match self.read(key) {
            Ok(Some(Ok(entry))) if entry.stored_at != seen_stored_at => {
                debug!("Keeping cache entry {key}, it was rewritten during the sweep");
                Ok(false)
            }
            Ok(None) => Ok(false),
            // Corrupt entries were seen as corrupt, and unreadable ones fail
            // the removal below just the same
            Ok(Some(_)) | Err(_) => self.remove(key),
        }
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::CacheIo(path, e)),
        }
    }
}

impl CacheHandle for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        match self.read(key) {
            Ok(None) => Ok(None),
            Ok(Some(Ok(entry))) => Ok(Some(entry)),
            Ok(Some(Err(e))) => {
                warn!("Ignoring corrupt cache entry: {e}");
                Ok(None)
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable cache entry {}: {e}",
                    self.entry_path(key).display()
                );
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, value: &ValidationResult, ttl: Duration) -> Result<()> {
        self.store(&CacheEntry::new(key.clone(), value.clone(), ttl))
    }

    fn sweep(&self, max_entries: usize) -> Result<SweepReport> {
        let _lock = self.lock()?;
        let now = timestamp();

        let mut snapshot = Vec::new();
        for key in self.keys()? {
            match self.read(&key) {
                Ok(Some(Ok(entry))) => {
                    let fresh = entry.is_fresh_at(now);
                    snapshot.push((key, entry.stored_at, fresh));
                }
                // Corrupt entries are never served, so they go with the stale ones
                Ok(Some(Err(e))) => {
                    debug!("Sweeping corrupt cache entry: {e}");
                    snapshot.push((key, 0, false));
                }
                // Removed by a concurrent writer or unreadable: leave it alone
                Ok(None) | Err(_) => {}
            }
        }

        let seen: HashMap<CacheKey, Timestamp> = snapshot
            .iter()
            .map(|(key, stored_at, _)| (key.clone(), *stored_at))
            .collect();
        let (doomed, mut report) = plan_sweep(snapshot, max_entries);
        // Expired keys come first in the plan
        for (i, key) in doomed.iter().enumerate() {
            let seen_stored_at = seen.get(key).copied().unwrap_or_default();
            if !self.remove_unless_rewritten(key, seen_stored_at)? {
                if i < report.expired {
                    report.expired -= 1;
                } else {
                    report.evicted -= 1;
                }
                report.remaining += 1;
            }
        }
        info!(
            "Swept cache at {}: {} expired, {} evicted, {} remaining",
            self.dir.display(),
            report.expired,
            report.evicted,
            report.remaining
        );
        Ok(report)
    }

    fn len(&self) -> usize {
        self.keys().map_or(0, |keys| keys.len())
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread, time::Duration};

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::{ErrorKind, test_utils::accessible_result};

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        let key = CacheKey::for_raw("https://example.org/privacy");
        let value = accessible_result("https://example.org/privacy");

        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(&key, &value, Duration::from_secs(3600)).unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert!(entry.is_fresh());
        assert!(entry.value.accessible);
        assert_eq!(entry.value, value);
        assert_eq!(cache.len(), 1);

        // Another handle on the same directory sees the entry
        let other = DiskCache::open(dir.path()).unwrap();
        assert_eq!(other.get(&key).unwrap().unwrap().value, value);
    }

    #[test]
    fn test_expired_entry_is_not_fresh() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        let key = CacheKey::for_raw("https://example.org/privacy");
        cache
            .put(&key, &accessible_result("https://example.org/privacy"), Duration::ZERO)
            .unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert!(!entry.is_fresh());
    }

    #[test]
    fn test_overwrite() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        let key = CacheKey::for_raw("https://example.org/privacy");
        let mut value = accessible_result("https://example.org/privacy");
        cache.put(&key, &value, Duration::from_secs(60)).unwrap();

        value.accessible = false;
        value.error_kind = ErrorKind::HttpError;
        value.status_code = Some(404);
        cache.put(&key, &value, Duration::from_secs(60)).unwrap();

        let entry = cache.get(&key).unwrap().unwrap();
        assert_eq!(entry.value.error_kind, ErrorKind::HttpError);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_corrupt_entry_is_absent() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        let key = CacheKey::for_raw("https://example.org/privacy");
        fs::write(dir.path().join(format!("{key}.json")), b"{ not json").unwrap();

        assert_eq!(cache.get(&key).unwrap(), None);

        let report = cache.sweep(100).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweep_bounds_size_oldest_first() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();

        let now = timestamp();
        let mut keys = Vec::new();
        for (i, age) in [100, 300, 200].into_iter().enumerate() {
            let url = format!("https://example.org/{i}");
            let key = CacheKey::for_raw(&url);
            let mut entry =
                CacheEntry::new(key.clone(), accessible_result(&url), Duration::from_secs(86_400));
            entry.stored_at = now - age;
            cache.store(&entry).unwrap();
            keys.push(key);
        }
        let stale_url = "https://example.org/stale";
        cache
            .put(&CacheKey::for_raw(stale_url), &accessible_result(stale_url), Duration::ZERO)
            .unwrap();

        let report = cache.sweep(2).unwrap();
        assert_eq!(
            report,
            SweepReport {
                expired: 1,
                evicted: 1,
                remaining: 2
            }
        );
        assert!(cache.get(&keys[0]).unwrap().is_some());
        assert!(cache.get(&keys[1]).unwrap().is_none());
        assert!(cache.get(&keys[2]).unwrap().is_some());
    }

    #[test]
    fn test_sweep_keeps_entries_rewritten_after_the_snapshot() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        let url = "https://example.org/privacy";
        let key = CacheKey::for_raw(url);

        let mut stale = CacheEntry::new(key.clone(), accessible_result(url), Duration::from_secs(1));
        stale.stored_at = timestamp() - 100;
        cache.store(&stale).unwrap();

        // A writer refreshes the entry between snapshot and removal
        cache.put(&key, &accessible_result(url), Duration::from_secs(3600)).unwrap();
        assert!(!cache.remove_unless_rewritten(&key, stale.stored_at).unwrap());
        assert!(cache.get(&key).unwrap().unwrap().is_fresh());

        let current = cache.get(&key).unwrap().unwrap().stored_at;
        assert!(cache.remove_unless_rewritten(&key, current).unwrap());
        assert_eq!(cache.get(&key).unwrap(), None);
        assert!(!cache.remove_unless_rewritten(&key, current).unwrap());
    }

    #[test]
    fn test_clear_keeps_foreign_files() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        for i in 0..3 {
            let url = format!("https://example.org/{i}");
            cache
                .put(&CacheKey::for_raw(&url), &accessible_result(&url), Duration::from_secs(60))
                .unwrap();
        }
        fs::write(dir.path().join("README"), b"keep me").unwrap();

        assert_eq!(cache.clear().unwrap(), 3);
        assert_eq!(cache.len(), 0);
        assert!(dir.path().join("README").exists());
    }

    #[test]
    fn test_concurrent_writers_never_tear_entries() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(dir.path()).unwrap());
        let key = CacheKey::for_raw("https://example.org/privacy");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let value = accessible_result("https://example.org/privacy");
                        cache.put(&key, &value, Duration::from_secs(60)).unwrap();
                        assert!(cache.get(&key).unwrap().is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_open_unusable_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = DiskCache::open(file.path().join("cache"));
        assert!(matches!(result, Err(Error::CacheUnavailable(_, _))));
    }
}
