use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{HostKey, HostStats, HostStatsMap};
use crate::{Error, Result};

/// Default sustained requests per second and host
pub const DEFAULT_PER_HOST_RATE: f64 = 2.0;

/// Default number of requests a host may receive back to back
pub const DEFAULT_PER_HOST_BURST: u32 = 1;

/// Waits shorter than this are not worth logging
const THROTTLE_LOG_THRESHOLD: Duration = Duration::from_millis(1);

/// Token bucket parameters shared by every host of a [`HostLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second; fractions such as `0.5` are allowed
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Bucket capacity, i.e. requests that may be sent without waiting
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
        }
    }
}

const fn default_rate() -> f64 {
    DEFAULT_PER_HOST_RATE
}

const fn default_burst() -> u32 {
    DEFAULT_PER_HOST_BURST
}

impl RateLimitConfig {
    /// Translate the configuration into a `governor` quota.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] unless the rate is finite and
    /// positive and the burst is at least one.
    pub fn quota(&self) -> Result<Quota> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::InvalidPolicy(format!(
                "per-host rate must be a positive number, got {}",
                self.rate
            )));
        }
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| Error::InvalidPolicy("per-host burst must be at least 1".into()))?;
        let period = Duration::try_from_secs_f64(self.rate.recip())
            .ok()
            .and_then(Quota::with_period)
            .ok_or_else(|| {
                Error::InvalidPolicy(format!("per-host rate {} is out of range", self.rate))
            })?;
        Ok(period.allow_burst(burst))
    }
}

/// State of a single host
#[derive(Debug)]
struct Bucket {
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    stats: Mutex<HostStats>,
    in_flight: AtomicUsize,
}

impl Bucket {
    fn new(quota: Quota) -> Self {
        Self {
            rate_limiter: RateLimiter::direct(quota),
            stats: Mutex::new(HostStats::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn with_stats<T>(&self, f: impl FnOnce(&mut HostStats) -> T) -> T {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }
}

/// Hands out per-host permits at a bounded rate.
///
/// Buckets are created lazily and live as long as the limiter. Cloning is
/// cheap and yields a handle to the same buckets, so one limiter can pace
/// several batches at once.
#[derive(Debug, Clone)]
pub struct HostLimiter {
    config: RateLimitConfig,
    quota: Quota,
    hosts: Arc<DashMap<HostKey, Arc<Bucket>>>,
}

impl HostLimiter {
    /// Create a limiter without any buckets yet
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] if the configuration is unusable,
    /// see [`RateLimitConfig::quota`].
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Ok(Self {
            quota: config.quota()?,
            config,
            hosts: Arc::new(DashMap::new()),
        })
    }

    /// The configuration this limiter was created with
    #[must_use]
    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn bucket(&self, host: &HostKey) -> Arc<Bucket> {
        if let Some(bucket) = self.hosts.get(host) {
            return Arc::clone(bucket.value());
        }
        let entry = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(Bucket::new(self.quota)));
        Arc::clone(entry.value())
    }

    /// Wait until `host` may receive another request.
    ///
    /// Only requests to the same host wait on each other.
    pub async fn acquire(&self, host: &HostKey) -> HostPermit {
        let bucket = self.bucket(host);
        let start = Instant::now();
        bucket.rate_limiter.until_ready().await;
        let waited = start.elapsed();
        if waited >= THROTTLE_LOG_THRESHOLD {
            debug!("Throttled request to {host} for {}ms", waited.as_millis());
            bucket.with_stats(|stats| stats.record_throttled(waited));
        }
        bucket.in_flight.fetch_add(1, Ordering::SeqCst);
        HostPermit {
            bucket,
            host: host.clone(),
            issued: Instant::now(),
        }
    }

    /// Give a permit back. Equivalent to dropping it.
    pub fn release(&self, permit: HostPermit) {
        drop(permit);
    }

    /// Count a target for `host` that was answered from the result cache
    pub fn record_cache_hit(&self, host: &HostKey) {
        self.bucket(host).with_stats(HostStats::record_cache_hit);
    }

    /// Number of permits for `host` currently held
    #[must_use]
    pub fn in_flight(&self, host: &HostKey) -> usize {
        self.hosts
            .get(host)
            .map_or(0, |bucket| bucket.in_flight.load(Ordering::SeqCst))
    }

    /// Statistics of a single host, if it was ever contacted
    #[must_use]
    pub fn host_stats(&self, host: &HostKey) -> Option<HostStats> {
        self.hosts
            .get(host)
            .map(|bucket| bucket.with_stats(|stats| stats.clone()))
    }

    /// Snapshot of the statistics of every host
    #[must_use]
    pub fn stats(&self) -> HostStatsMap {
        self.hosts
            .iter()
            .map(|entry| {
                let stats = entry.value().with_stats(|stats| stats.clone());
                (entry.key().clone(), stats)
            })
            .collect()
    }
}

/// Permission to send one request to a host.
///
/// Holders report what happened through [`HostPermit::record_response`] or
/// [`HostPermit::record_failure`]. The permit is released when dropped.
#[derive(Debug)]
pub struct HostPermit {
    bucket: Arc<Bucket>,
    host: HostKey,
    issued: Instant,
}

impl HostPermit {
    /// The host this permit is valid for
    #[must_use]
    pub const fn host(&self) -> &HostKey {
        &self.host
    }

    /// Record the status code the host answered with
    pub fn record_response(&self, status_code: u16) {
        let elapsed = self.issued.elapsed();
        self.bucket
            .with_stats(|stats| stats.record_response(status_code, elapsed));
    }

    /// Record that the host could not be reached or did not answer
    pub fn record_failure(&self) {
        let elapsed = self.issued.elapsed();
        self.bucket.with_stats(|stats| stats.record_failure(elapsed));
    }
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        self.bucket.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use rstest::rstest;

    use super::*;

    fn limiter(rate: f64, burst: u32) -> HostLimiter {
        HostLimiter::new(RateLimitConfig { rate, burst }).unwrap()
    }

    #[rstest]
    #[case(0.0, 1)]
    #[case(-1.0, 1)]
    #[case(f64::NAN, 1)]
    #[case(f64::INFINITY, 1)]
    #[case(2.0, 0)]
    fn test_invalid_config(#[case] rate: f64, #[case] burst: u32) {
        let result = HostLimiter::new(RateLimitConfig { rate, burst });
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert!((config.rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.burst, 1);
        assert!(config.quota().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config: RateLimitConfig = toml::from_str("rate = 0.5").unwrap();
        assert!((config.rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.burst, 1);
    }

    #[tokio::test]
    async fn test_same_host_is_paced() {
        let limiter = limiter(20.0, 1);
        let host = HostKey::from("example.org");

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(&host).await;
        }
        // First permit is free, the other four are 50ms apart
        assert!(start.elapsed() >= Duration::from_millis(190));

        let stats = limiter.host_stats(&host).unwrap();
        assert!(stats.throttled >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiter = limiter(1.0, 1);

        let start = Instant::now();
        for i in 0..5 {
            limiter.acquire(&HostKey::from(format!("h{i}.example.org").as_str())).await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(limiter.stats().len(), 5);
    }

    #[tokio::test]
    async fn test_burst() {
        let limiter = limiter(1.0, 3);
        let host = HostKey::from("example.org");

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&host).await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_permit_tracking() {
        let limiter = limiter(100.0, 10);
        let host = HostKey::from("example.org");

        let first = limiter.acquire(&host).await;
        let second = limiter.clone().acquire(&host).await;
        assert_eq!(limiter.in_flight(&host), 2);

        first.record_response(200);
        second.record_failure();
        limiter.release(first);
        drop(second);
        assert_eq!(limiter.in_flight(&host), 0);

        limiter.record_cache_hit(&host);
        let stats = limiter.host_stats(&host).unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.transport_failures, 1);
        assert_eq!(stats.cache_hits, 1);
    }
}
