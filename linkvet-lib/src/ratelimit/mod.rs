//! Per-host request rate limiting.
//!
//! Every host gets its own token bucket, created lazily on first use. The
//! buckets are independent of the global concurrency ceiling: a slow host
//! only delays requests to itself.
//!
//! # Architecture
//!
//! - [`HostKey`]: a normalized hostname
//! - [`HostLimiter`]: owns the buckets and hands out [`HostPermit`]s
//! - [`RateLimitConfig`]: rate and burst shared by all buckets of a limiter
//! - [`HostStats`]: what was observed per host

mod headers;
mod key;
mod limiter;
mod stats;

pub(crate) use headers::parse_retry_after;
pub use key::HostKey;
pub use limiter::{
    DEFAULT_PER_HOST_BURST, DEFAULT_PER_HOST_RATE, HostLimiter, HostPermit, RateLimitConfig,
};
pub use stats::{HostStats, HostStatsMap};
