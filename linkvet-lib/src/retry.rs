//! Bounded retries with exponential backoff.
//!
//! [`run`] keeps invoking a probe while its outcome is transient and the
//! attempt budget lasts, sleeping `base_delay * multiplier^(n-1)` plus a
//! random jitter between attempts.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::probe::{RawOutcome, TransportSignal};
use crate::{Error, Result};

/// Default number of probe invocations per target
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default growth factor of the delay
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default upper bound of the random jitter
pub const DEFAULT_JITTER: Duration = Duration::from_millis(250);

/// Upper bound of any single delay, including one requested by the server
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Statuses worth retrying by default
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// How an outcome affects the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// May succeed when tried again
    Transient,
    /// May succeed when tried again, but only worth a single retry
    TransientOnce,
    /// Will not change by retrying
    Terminal,
}

/// An extension trait to determine whether an outcome is worth another attempt.
pub trait Retryable {
    /// Classify the outcome given the statuses a policy considers transient
    fn transience(&self, retryable_statuses: &HashSet<u16>) -> Transience;

    /// Delay the server asked for, if any
    fn retry_after(&self) -> Option<Duration>;
}

impl Retryable for RawOutcome {
    fn transience(&self, retryable_statuses: &HashSet<u16>) -> Transience {
        match self {
            // A challenge will be served again, no matter how often we ask
            Self::Response(response) if response.protection.is_some() => Transience::Terminal,
            Self::Response(response) if retryable_statuses.contains(&response.status.as_u16()) => {
                Transience::Transient
            }
            Self::Response(_) => Transience::Terminal,
            Self::Failure(failure) => match failure.signal {
                TransportSignal::Timeout
                | TransportSignal::Connect
                | TransportSignal::ConnectionReset => Transience::Transient,
                TransportSignal::Tls => Transience::TransientOnce,
                TransportSignal::RedirectLoop
                | TransportSignal::TooManyRedirects
                | TransportSignal::InvalidUrl
                | TransportSignal::ResponseTooLarge
                | TransportSignal::Other => Transience::Terminal,
            },
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Response(response) => response.retry_after,
            Self::Failure(_) => None,
        }
    }
}

/// The last outcome of a retry loop and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The outcome of the last attempt
    pub outcome: T,
    /// Number of attempts made, at least 1
    pub attempts: u32,
}

/// Parameters of the retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    /// Factor applied to the delay after every attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound of the uniform random delay added to every backoff
    #[serde(default = "default_jitter", with = "humantime_serde")]
    pub jitter: Duration,
    /// Response statuses treated as transient
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: HashSet<u16>,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

const fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

const fn default_jitter() -> Duration {
    DEFAULT_JITTER
}

fn default_retryable_statuses() -> HashSet<u16> {
    DEFAULT_RETRYABLE_STATUSES.into_iter().collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl RetryPolicy {
    /// Check that the policy allows at least one attempt and that the
    /// delay never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidPolicy("max attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidPolicy(format!(
                "backoff multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Delay before the attempt following attempt number `attempt`,
    /// without jitter.
    ///
    /// A server-requested delay raises the result but is capped at
    /// [`MAX_DELAY`].
    #[must_use]
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let backoff = Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY);
        match retry_after {
            Some(requested) => backoff.max(requested.min(MAX_DELAY)),
            None => backoff,
        }
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

/// Run `probe` until its outcome is not transient or `policy.max_attempts`
/// is exhausted.
///
/// `probe` receives the number of the attempt, starting at 1. The last
/// outcome is returned together with the number of attempts.
pub async fn run<F, Fut, T>(mut probe: F, policy: &RetryPolicy) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    T: Retryable,
{
    let mut attempts = 0;
    let mut once_retried = false;
    loop {
        attempts += 1;
        let outcome = probe(attempts).await;

        let retry = match outcome.transience(&policy.retryable_statuses) {
            Transience::Transient => true,
            Transience::TransientOnce => !std::mem::replace(&mut once_retried, true),
            Transience::Terminal => false,
        };
        if !retry || attempts >= policy.max_attempts {
            return Attempted { outcome, attempts };
        }

        let delay = policy.backoff(attempts, outcome.retry_after()) + policy.jitter();
        debug!("Attempt {attempts} was transient, retrying in {}ms", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}
