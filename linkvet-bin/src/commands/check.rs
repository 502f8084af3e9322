use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::StreamExt;
use linkvet_lib::{BatchStatus, CacheHandle, Cancellation, DiskCache, NoCache, Validator};
use log::{info, warn};

use crate::ExitCode;
use crate::formatters::{OutputStats, get_formatter};
use crate::options::Config;
use crate::targets;

/// Validate all targets listed in `input` and print the results
pub(crate) async fn check(input: &Path, config: &Config) -> Result<ExitCode> {
    let targets = targets::load(input)?;
    info!("Loaded {} targets from {}", targets.len(), input.display());

    let validator = Validator::new(config.policy(), open_cache(config))
        .context("Cannot set up the validator")?;

    let cancel = Cancellation::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, waiting for probes in flight to finish");
                cancel.cancel();
            }
        }
    });

    let start = Instant::now();
    let mut formatter = get_formatter(config.format);
    let mut batch = validator.validate_batch(targets, cancel);
    let mut stdout = io::stdout().lock();
    while let Some(result) = batch.next().await {
        if let Some(line) = formatter.format_result(result) {
            writeln!(stdout, "{line}")?;
        }
    }
    let report = batch.report().await?;

    let stats = OutputStats {
        report,
        duration_secs: start.elapsed().as_secs(),
        host_stats: config
            .host_stats
            .then(|| validator.host_limiter().stats()),
    };
    writeln!(stdout, "{}", formatter.format_stats(stats)?)?;

    let exit_code = if report.status == BatchStatus::Cancelled || !report.is_success() {
        ExitCode::LinkCheckFailure
    } else {
        ExitCode::Success
    };
    Ok(exit_code)
}

/// The on-disk cache, or none at all if it is disabled or cannot be used
fn open_cache(config: &Config) -> Arc<dyn CacheHandle> {
    if config.no_cache {
        return Arc::new(NoCache);
    }
    match DiskCache::open(&config.cache_dir) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("{e}. Continuing without cache.");
            Arc::new(NoCache)
        }
    }
}
