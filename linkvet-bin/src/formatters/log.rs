use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::{formatters::color::color_for_level, verbosity::Verbosity};

/// Initialize the logging system with the given verbosity level.
///
/// Logs go to stderr, so they never mix with results on stdout.
pub(crate) fn init_logging(verbose: &Verbosity) {
    // Set a base level for all modules to `warn`, which is a reasonable default.
    // It will be overridden by RUST_LOG if it's set.
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);

    if std::env::var("RUST_LOG").is_err() {
        let level_filter = verbose.log_level_filter();

        // Dependencies stay at `warn`, only our own crates follow `-v`
        builder.filter_level(LevelFilter::Warn);
        builder
            .filter_module("linkvet", level_filter)
            .filter_module("linkvet_lib", level_filter);
    }

    builder.format(move |buf, record| {
        let level = record.level();
        writeln!(
            buf,
            "{} {}",
            color_for_level(level).apply_to(format!("[{level}]")),
            record.args()
        )
    });

    builder.init();
}
