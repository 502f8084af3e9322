//! Runs batches of targets concurrently.
//!
//! For every target the [`Validator`] either answers from the cache or
//! dispatches a worker holding one global slot. The worker runs the retry
//! loop around the probe, which takes a per-host permit for every request it
//! sends, classifies the last outcome and writes the result back to the
//! cache. Cache I/O runs on the blocking pool. Results are streamed in
//! completion order.

mod cancel;
mod policy;
mod report;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, warn};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::cache::{CacheHandle, CacheKey};
use crate::probe::{Prober, RawOutcome};
use crate::ratelimit::{HostKey, HostLimiter};
use crate::retry::{self, RetryPolicy};
use crate::{Error, ErrorKind, Result, ValidationResult, ValidationTarget, classify};

pub use cancel::Cancellation;
pub use policy::{
    DEFAULT_CACHE_TTL, DEFAULT_CONCURRENCY, DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_PER_HOST_BURST,
    DEFAULT_PER_HOST_RATE, DEFAULT_TIMEOUT, Limiter, SharedLimiter, ValidationPolicy,
};
pub use report::{BatchReport, BatchStatus, CacheStats};

use report::Counters;

/// Validates batches of targets under one policy.
///
/// The limiter lives as long as the validator: consecutive batches on the
/// same validator share slots and token buckets.
#[derive(Debug)]
pub struct Validator {
    policy: ValidationPolicy,
    cache: Arc<dyn CacheHandle>,
    prober: Prober,
    retry: RetryPolicy,
    slots: Arc<Semaphore>,
    hosts: HostLimiter,
}

impl Validator {
    /// Create a validator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`](crate::Error::InvalidPolicy) if the
    /// policy cannot work, or an error if the HTTP client cannot be built.
    pub fn new(policy: ValidationPolicy, cache: Arc<dyn CacheHandle>) -> Result<Self> {
        policy.validate()?;
        let (slots, hosts) = match &policy.limiter {
            Limiter::Owned => (
                Arc::new(Semaphore::new(policy.concurrency_limit)),
                HostLimiter::new(policy.rate_limit_config())?,
            ),
            Limiter::External(shared) => (Arc::clone(&shared.slots), shared.hosts.clone()),
        };
        Ok(Self {
            prober: policy.prober()?,
            retry: policy.retry_policy(),
            policy,
            cache,
            slots,
            hosts,
        })
    }

    /// The policy this validator runs under
    #[must_use]
    pub const fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// The per-host limiter, e.g. to read host statistics after a batch
    #[must_use]
    pub const fn host_limiter(&self) -> &HostLimiter {
        &self.hosts
    }

    /// Start validating `targets`.
    ///
    /// Must be called from within a Tokio runtime. The returned [`Batch`]
    /// yields one [`ValidationResult`] per dispatched target and finally a
    /// [`BatchReport`].
    pub fn validate_batch(&self, targets: Vec<ValidationTarget>, cancel: Cancellation) -> Batch {
        let ctx = Arc::new(BatchContext {
            cache: Arc::clone(&self.cache),
            cache_disabled: AtomicBool::new(false),
            prober: self.prober.clone(),
            retry: self.retry.clone(),
            slots: Arc::clone(&self.slots),
            hosts: self.hosts.clone(),
            policy: self.policy.clone(),
            counters: Counters::default(),
        });
        let (sender, receiver) = mpsc::channel(self.policy.concurrency_limit.max(1));
        let driver = tokio::spawn(drive(ctx, targets, cancel, sender));
        Batch {
            results: ReceiverStream::new(receiver),
            driver,
        }
    }
}

/// A running batch.
///
/// Poll it as a [`Stream`] to receive results as they complete, then call
/// [`Batch::report`] for the summary.
#[derive(Debug)]
pub struct Batch {
    results: ReceiverStream<ValidationResult>,
    driver: JoinHandle<Result<BatchReport>>,
}

impl Stream for Batch {
    type Item = ValidationResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.results).poll_next(cx)
    }
}

impl Batch {
    /// Wait for the batch to finish and return its summary.
    ///
    /// Results not consumed yet are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker panicked.
    pub async fn report(self) -> Result<BatchReport> {
        self.collect_all().await.map(|(_, report)| report)
    }

    /// Wait for the batch to finish, returning every result not consumed
    /// yet together with the summary.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker panicked.
    pub async fn collect_all(self) -> Result<(Vec<ValidationResult>, BatchReport)> {
        let Self {
            mut results,
            driver,
        } = self;
        let mut collected = Vec::new();
        while let Some(result) = futures::StreamExt::next(&mut results).await {
            collected.push(result);
        }
        let report = driver.await??;
        Ok((collected, report))
    }
}

/// State shared by the driver and the workers of one batch
#[derive(Debug)]
struct BatchContext {
    cache: Arc<dyn CacheHandle>,
    cache_disabled: AtomicBool,
    prober: Prober,
    retry: RetryPolicy,
    slots: Arc<Semaphore>,
    hosts: HostLimiter,
    policy: ValidationPolicy,
    counters: Counters,
}

impl BatchContext {
    fn disable_cache(&self, reason: &Error) {
        if !self.cache_disabled.swap(true, Ordering::SeqCst) {
            warn!("Disabling cache for the rest of the batch: {reason}");
        }
    }

    fn cache_enabled(&self) -> bool {
        !self.cache_disabled.load(Ordering::SeqCst)
    }

    /// TTL cleanup and size bound before anything is dispatched
    async fn sweep(&self) -> Result<()> {
        let cache = Arc::clone(&self.cache);
        let max_entries = self.policy.max_cache_entries;
        match tokio::task::spawn_blocking(move || cache.sweep(max_entries)).await? {
            Ok(report) => debug!(
                "Startup sweep: {} expired, {} evicted, {} remaining",
                report.expired, report.evicted, report.remaining
            ),
            Err(e) => self.disable_cache(&e),
        }
        Ok(())
    }

    /// A fresh cached result for `key`, if any
    async fn lookup(&self, key: &CacheKey) -> Option<ValidationResult> {
        if !self.cache_enabled() {
            return None;
        }
        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        let entry = tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .map_err(Error::from)
            .and_then(|entry| entry);
        match entry {
            Ok(entry) => entry
                .filter(crate::CacheEntry::is_fresh)
                .map(|entry| entry.value),
            Err(e) => {
                warn!("Cache lookup failed, validating instead: {e}");
                None
            }
        }
    }

    async fn store(&self, key: CacheKey, result: &ValidationResult) {
        if !self.cache_enabled() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let value = result.clone();
        let ttl = self.policy.cache_ttl;
        let stored = tokio::task::spawn_blocking(move || cache.put(&key, &value, ttl))
            .await
            .map_err(Error::from)
            .and_then(|stored| stored);
        if let Err(e) = stored {
            self.disable_cache(&e);
        }
    }

    async fn emit(&self, sender: &mpsc::Sender<ValidationResult>, result: ValidationResult) {
        self.counters.record_result(&result);
        // The receiver is gone if the caller dropped the batch; keep going so
        // that the cache still gets written
        let _ = sender.send(result).await;
    }

    /// Probe a target with retries, classify and write back
    async fn check(&self, target: ValidationTarget, url: Url, key: CacheKey) -> ValidationResult {
        let url_ref = &url;
        let attempted = retry::run(move |attempt| self.attempt(url_ref, attempt), &self.retry).await;

        let error_kind = classify(&attempted.outcome);
        if error_kind == ErrorKind::Unknown
            && let RawOutcome::Failure(failure) = &attempted.outcome
        {
            warn!("Unclassified failure for {url}: {}", failure.detail);
        }
        let result = ValidationResult::from_outcome(target, attempted, error_kind);
        self.store(key, &result).await;
        result
    }

    async fn attempt(&self, url: &Url, attempt: u32) -> RawOutcome {
        debug!("Attempt {attempt} for {url}");
        self.prober
            .probe_paced(url, self.policy.timeout, self.policy.method_policy, &self.hosts)
            .await
    }

    async fn entries(&self) -> Result<usize> {
        let cache = Arc::clone(&self.cache);
        Ok(tokio::task::spawn_blocking(move || cache.len()).await?)
    }
}

/// Dispatch every target, then wait for the workers and build the report
async fn drive(
    ctx: Arc<BatchContext>,
    targets: Vec<ValidationTarget>,
    cancel: Cancellation,
    sender: mpsc::Sender<ValidationResult>,
) -> Result<BatchReport> {
    ctx.sweep().await?;

    let mut workers = JoinSet::new();
    let mut cancelled = false;

    for target in targets {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let url = match target.parse_url() {
            Ok(url) => url,
            Err(detail) => {
                debug!("Not probing malformed URL {target}: {detail}");
                ctx.emit(&sender, ValidationResult::malformed(target, detail))
                    .await;
                continue;
            }
        };

        let key = CacheKey::for_url(&url);
        if let Some(cached) = ctx.lookup(&key).await {
            ctx.counters.record_hit();
            if let Ok(host) = HostKey::try_from(&url) {
                ctx.hosts.record_cache_hit(&host);
            }
            ctx.emit(&sender, cached.for_cached_target(target)).await;
            continue;
        }
        ctx.counters.record_miss();

        let slot = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            slot = Arc::clone(&ctx.slots).acquire_owned() => slot,
        };
        let Ok(slot) = slot else {
            // Only a closed semaphore fails, and nobody closes it
            warn!("Concurrency limiter was closed, stopping dispatch");
            break;
        };

        let ctx = Arc::clone(&ctx);
        let sender = sender.clone();
        workers.spawn(async move {
            let result = ctx.check(target, url, key).await;
            drop(slot);
            ctx.emit(&sender, result).await;
        });

        while let Some(joined) = workers.try_join_next() {
            joined?;
        }
    }

    while let Some(joined) = workers.join_next().await {
        joined?;
    }

    let status = if cancelled {
        BatchStatus::Cancelled
    } else if ctx.cache_enabled() {
        BatchStatus::Completed
    } else {
        BatchStatus::CacheUnavailableDegraded
    };
    let entries = ctx.entries().await?;
    Ok(ctx.counters.report(status, entries))
}
