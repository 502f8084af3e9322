pub(crate) mod color;
pub(crate) mod duration;
pub(crate) mod json;
pub(crate) mod log;
pub(crate) mod plain;

use anyhow::Result;
use linkvet_lib::ratelimit::HostStatsMap;
use linkvet_lib::{BatchReport, ValidationResult};
use serde::Serialize;

use crate::options::OutputFormat;

/// Everything known once a batch is done
#[derive(Debug, Serialize)]
pub(crate) struct OutputStats {
    pub(crate) report: BatchReport,
    /// Wall-clock time of the batch in seconds
    pub(crate) duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) host_stats: Option<HostStatsMap>,
}

/// Renders results as they arrive and the statistics at the end
pub(crate) trait Formatter {
    /// Output for a single result, if it is printed right away
    fn format_result(&mut self, result: ValidationResult) -> Option<String>;

    /// Output once the batch is done
    fn format_stats(self: Box<Self>, stats: OutputStats) -> Result<String>;
}

pub(crate) fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Plain => Box::new(plain::Plain),
        OutputFormat::Json => Box::new(json::Json::default()),
    }
}
