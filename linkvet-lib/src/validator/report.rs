use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use strum::Display;

use crate::{ErrorKind, ValidationResult};

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    /// Every target was dispatched
    Completed,
    /// Cancellation stopped the dispatch early
    Cancelled,
    /// Every target was dispatched, but the cache failed and was bypassed
    CacheUnavailableDegraded,
}

/// Cache usage of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Targets answered from the cache
    pub hits: usize,
    /// Targets which had to be probed
    pub misses: usize,
    /// Entries in the cache after the batch
    pub entries: usize,
}

/// Summary of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// How the batch ended
    pub status: BatchStatus,
    /// Cache usage
    pub cache: CacheStats,
    /// Results emitted
    pub total: usize,
    /// Results with `accessible == true`
    pub accessible: usize,
    /// Results with `accessible == false`
    pub failed: usize,
    /// Results classified as [`ErrorKind::Unknown`]
    pub unknown_errors: usize,
}

impl BatchReport {
    /// Whether every emitted result was accessible
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Counters updated concurrently by the workers of a batch
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    total: AtomicUsize,
    accessible: AtomicUsize,
    unknown_errors: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_result(&self, result: &ValidationResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.accessible {
            self.accessible.fetch_add(1, Ordering::Relaxed);
        }
        if result.error_kind == ErrorKind::Unknown {
            self.unknown_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn report(&self, status: BatchStatus, entries: usize) -> BatchReport {
        let total = self.total.load(Ordering::Relaxed);
        let accessible = self.accessible.load(Ordering::Relaxed);
        BatchReport {
            status,
            cache: CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                entries,
            },
            total,
            accessible,
            failed: total - accessible,
            unknown_errors: self.unknown_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_utils::accessible_result;

    #[test]
    fn test_counters() {
        let counters = Counters::default();
        counters.record_hit();
        counters.record_miss();
        counters.record_miss();

        counters.record_result(&accessible_result("https://example.org/a"));
        let mut unknown = accessible_result("https://example.org/b");
        unknown.accessible = false;
        unknown.error_kind = ErrorKind::Unknown;
        counters.record_result(&unknown);

        let report = counters.report(BatchStatus::Completed, 7);
        assert_eq!(
            report,
            BatchReport {
                status: BatchStatus::Completed,
                cache: CacheStats {
                    hits: 1,
                    misses: 2,
                    entries: 7
                },
                total: 2,
                accessible: 1,
                failed: 1,
                unknown_errors: 1,
            }
        );
        assert!(!report.is_success());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(
            BatchStatus::CacheUnavailableDegraded.to_string(),
            "cache_unavailable_degraded"
        );
        assert_eq!(
            serde_json::to_string(&BatchStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
