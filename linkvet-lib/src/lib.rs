//! `linkvet` checks whether a large set of externally supplied URLs is still
//! reachable, classifies the failures and remembers the results in an
//! expiring cache that can be shared between processes.
//!
//! A batch is a list of [`ValidationTarget`]s. The [`Validator`] runs them
//! concurrently, limited by a global number of in-flight requests and by a
//! per-host token bucket, and streams one [`ValidationResult`] per target:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use linkvet_lib::{Cancellation, NoCache, Result, ValidationPolicy, ValidationTarget, Validator};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let validator = Validator::new(ValidationPolicy::default(), Arc::new(NoCache))?;
//!     let targets = vec![ValidationTarget::new(
//!         "https://idp.example.org/idp",
//!         "https://example.org/privacy",
//!     )];
//!
//!     let mut batch = validator.validate_batch(targets, Cancellation::new());
//!     while let Some(result) = batch.next().await {
//!         println!("{} {}", result.url, result.error_kind);
//!     }
//!     println!("{:?}", batch.report().await?);
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
#[macro_use]
pub mod test_utils;

mod classify;
mod time;
mod types;

pub mod cache;
pub mod probe;
pub mod ratelimit;
pub mod retry;
pub mod validator;

pub use crate::{
    cache::{CacheEntry, CacheHandle, CacheKey, DiskCache, MemoryCache, NoCache, SweepReport},
    classify::classify,
    probe::{MethodPolicy, Prober, RawOutcome},
    retry::{Attempted, RetryPolicy},
    time::{Timestamp, timestamp},
    types::*,
    validator::{
        Batch, BatchReport, BatchStatus, CacheStats, Cancellation, Limiter, SharedLimiter,
        ValidationPolicy, Validator,
    },
};
