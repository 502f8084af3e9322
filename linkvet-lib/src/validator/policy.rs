use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use typed_builder::TypedBuilder;

use crate::probe::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_USER_AGENT, MethodPolicy, Prober,
    ProberBuilder,
};
use crate::ratelimit::{HostLimiter, RateLimitConfig};
use crate::retry::{
    DEFAULT_BASE_DELAY, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MULTIPLIER,
    DEFAULT_RETRYABLE_STATUSES, RetryPolicy,
};

pub use crate::ratelimit::{DEFAULT_PER_HOST_BURST, DEFAULT_PER_HOST_RATE};
use crate::{Error, Result};

/// Default number of probes in flight across all hosts
pub const DEFAULT_CONCURRENCY: usize = 64;
/// Default timeout of a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
/// Default time a cached result stays fresh
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default upper bound of cache entries kept by the startup sweep
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 100_000;

/// A concurrency limiter owned by the caller.
///
/// Lets several [`Validator`](crate::Validator)s, possibly working on
/// unrelated batches, share one global slot budget and one set of per-host
/// token buckets. Cloning yields a handle to the same state.
#[derive(Debug, Clone)]
pub struct SharedLimiter {
    pub(crate) slots: Arc<Semaphore>,
    pub(crate) hosts: HostLimiter,
}

impl SharedLimiter {
    /// Create a limiter with `max_concurrency` global slots
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] if `max_concurrency` is zero.
    pub fn new(max_concurrency: usize, hosts: HostLimiter) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(Error::InvalidPolicy(
                "shared limiter needs at least one slot".into(),
            ));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            hosts,
        })
    }

    /// The per-host limiter, e.g. to read statistics
    #[must_use]
    pub const fn hosts(&self) -> &HostLimiter {
        &self.hosts
    }

    /// Global slots not currently taken
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Who provides concurrency and rate limiting for a [`Validator`](crate::Validator)
#[derive(Debug, Clone, Default)]
pub enum Limiter {
    /// The validator creates its own slots and token buckets from the policy
    #[default]
    Owned,
    /// The caller's limiter is used as-is; the validator adds no throttling
    /// of its own and ignores the policy's concurrency and rate settings
    External(SharedLimiter),
}

/// Everything that governs a validation run
#[derive(TypedBuilder, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Probes in flight across all hosts
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency_limit: usize,

    /// Owned or externally supplied limiter
    #[serde(skip)]
    #[builder(default)]
    pub limiter: Limiter,

    /// Sustained requests per second and host
    #[builder(default = DEFAULT_PER_HOST_RATE)]
    pub per_host_rate: f64,

    /// Requests a host may receive back to back
    #[builder(default = DEFAULT_PER_HOST_BURST)]
    pub per_host_burst: u32,

    /// Timeout of every single request
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Probe invocations per target, including the first
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_BASE_DELAY)]
    pub backoff_base: Duration,

    /// Growth factor of the delay between attempts
    #[builder(default = DEFAULT_MULTIPLIER)]
    pub backoff_multiplier: f64,

    /// Upper bound of the random jitter added to every delay
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_JITTER)]
    pub backoff_jitter: Duration,

    /// Response statuses retried as transient, e.g. `503`
    #[builder(default = DEFAULT_RETRYABLE_STATUSES.into_iter().collect())]
    pub retryable_statuses: HashSet<u16>,

    /// How long a result stays fresh in the cache
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub cache_ttl: Duration,

    /// Size bound enforced by the sweep at the start of every batch
    #[builder(default = DEFAULT_MAX_CACHE_ENTRIES)]
    pub max_cache_entries: usize,

    /// Body bytes inspected on `GET`
    #[builder(default = DEFAULT_MAX_RESPONSE_BYTES)]
    pub max_response_bytes: usize,

    /// Redirects followed before giving up
    #[builder(default = DEFAULT_MAX_REDIRECTS)]
    pub max_redirects: u32,

    /// Which HTTP methods a probe may use
    #[builder(default)]
    pub method_policy: MethodPolicy,

    /// User agent sent with every request
    #[builder(default = DEFAULT_USER_AGENT.to_string(), setter(into))]
    pub user_agent: String,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ValidationPolicy {
    /// Reject policies that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.limiter, Limiter::Owned) {
            if self.concurrency_limit == 0 {
                return Err(Error::InvalidPolicy(
                    "concurrency limit must be at least 1".into(),
                ));
            }
            self.rate_limit_config().quota()?;
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidPolicy("timeout must be positive".into()));
        }
        if self.max_response_bytes == 0 {
            return Err(Error::InvalidPolicy(
                "max response bytes must be positive".into(),
            ));
        }
        self.retry_policy().validate()
    }

    /// The retry parameters of this policy
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.backoff_base,
            multiplier: self.backoff_multiplier,
            jitter: self.backoff_jitter,
            retryable_statuses: self.retryable_statuses.clone(),
        }
    }

    /// The token bucket parameters of this policy
    #[must_use]
    pub const fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            rate: self.per_host_rate,
            burst: self.per_host_burst,
        }
    }

    pub(crate) fn prober(&self) -> Result<Prober> {
        ProberBuilder::builder()
            .user_agent(self.user_agent.clone())
            .max_redirects(self.max_redirects)
            .max_response_bytes(self.max_response_bytes)
            .build()
            .prober()
    }
}
