use std::io::{self, Write};

use anyhow::{Context, Result};
use linkvet_lib::{CacheHandle, DiskCache};
use log::info;
use serde_json::json;

use crate::ExitCode;
use crate::options::{CacheAction, Config, OutputFormat};

/// Run a maintenance action on the cache directory
pub(crate) fn cache(action: CacheAction, config: &Config) -> Result<ExitCode> {
    let cache = DiskCache::open(&config.cache_dir)
        .with_context(|| format!("Cannot open cache at `{}`", config.cache_dir.display()))?;
    let dir = cache.dir().display().to_string();

    let (text, value) = match action {
        CacheAction::Stats => {
            let entries = cache.len();
            (
                format!("Cache at {dir}: {entries} entries"),
                json!({ "dir": dir, "entries": entries }),
            )
        }
        CacheAction::Sweep => {
            let report = cache.sweep(config.max_cache_entries)?;
            info!("Swept cache at {dir}");
            (
                format!(
                    "Removed {} expired and {} evicted entries, {} remaining",
                    report.expired, report.evicted, report.remaining
                ),
                serde_json::to_value(report)?,
            )
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            (
                format!("Removed {removed} entries from {dir}"),
                json!({ "dir": dir, "removed": removed }),
            )
        }
    };

    let mut stdout = io::stdout().lock();
    match config.format {
        OutputFormat::Plain => writeln!(stdout, "{text}")?,
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::to_string_pretty(&value)?)?,
    }
    Ok(ExitCode::Success)
}
