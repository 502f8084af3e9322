//! `linkvet` checks whether externally supplied URLs are still reachable.
//!
//! Targets are read as header-less CSV rows of `identifier,url`:
//!
//! ```sh
//! linkvet check targets.csv
//! cut -d, -f1,3 export.csv | linkvet check -
//! ```
//!
//! Results are cached in `.linkvetcache` for a day by default, so running
//! the same list again only probes what has expired. The cache can be
//! inspected and maintained with:
//!
//! ```sh
//! linkvet cache stats
//! linkvet cache sweep --max-cache-entries 10000
//! linkvet cache clear
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

use std::io;
use std::path::PathBuf;

use anyhow::{Error, Result, bail};
use clap::Parser;
use log::error;

mod commands;
mod formatters;
mod options;
mod targets;
mod verbosity;

use crate::formatters::log::init_logging;
use crate::options::{Command, Config, LINKVET_CONFIG_FILE, LinkvetOptions};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    LinkCheckFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge a potential config file into the options from the command line
fn merge_config_file(opts: &mut LinkvetOptions) -> Result<()> {
    let (path, explicit) = match &opts.config_file {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(LINKVET_CONFIG_FILE), false),
    };
    // The default file is optional, an explicitly given one is not
    if !explicit && !path.is_file() {
        return Ok(());
    }
    match Config::load_from_file(&path) {
        Ok(config) => {
            opts.config_mut().merge(config);
            Ok(())
        }
        Err(e) => bail!(
            "Cannot load configuration file `{}`: {e:?}",
            path.display()
        ),
    }
}

/// Parse the command line and merge the config file into it.
/// Logging is set up in any case, so that config errors can be reported.
fn load_config() -> Result<LinkvetOptions> {
    let mut opts = LinkvetOptions::parse();
    let merged = merge_config_file(&mut opts);
    init_logging(&opts.config().verbose);
    merged?;
    Ok(opts)
}

/// Set up runtime and call the requested command
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!(
                "Error while loading config: {e}\n\
                linkvet {} expects the same keys as the long command-line options",
                env!("CARGO_PKG_VERSION")
            );
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let result = match &opts.command {
        // Cache maintenance is plain file system work
        Command::Cache { action, config } => commands::cache(*action, config),
        Command::Check { input, config } => {
            let runtime = match config.threads {
                Some(threads) => {
                    // We define our own runtime instead of the `tokio::main` attribute
                    // since we want to make the number of threads configurable
                    tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(threads)
                        .enable_all()
                        .build()?
                }
                None => tokio::runtime::Runtime::new()?,
            };
            runtime.block_on(commands::check(input, config))
        }
    };

    match result {
        Ok(exit_code) => Ok(exit_code as i32),
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            Ok(ExitCode::Success as i32)
        }
        Err(e) if is_invalid_policy(&e) => {
            error!("{e:#}");
            Ok(ExitCode::ConfigFile as i32)
        }
        Err(e) => Err(e),
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Whether the settings themselves are unusable, e.g. a zero timeout
fn is_invalid_policy(error: &Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<linkvet_lib::Error>(),
            Some(linkvet_lib::Error::InvalidPolicy(_))
        )
    })
}
