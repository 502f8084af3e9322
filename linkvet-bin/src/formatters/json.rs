use anyhow::{Context, Result};
use linkvet_lib::ValidationResult;
use serde::Serialize;

use super::{Formatter, OutputStats};

/// Collects every result and prints a single JSON document at the end
#[derive(Default)]
pub(crate) struct Json {
    results: Vec<ValidationResult>,
}

#[derive(Serialize)]
struct JsonOutput {
    #[serde(flatten)]
    stats: OutputStats,
    results: Vec<ValidationResult>,
}

impl Formatter for Json {
    fn format_result(&mut self, result: ValidationResult) -> Option<String> {
        self.results.push(result);
        None
    }

    fn format_stats(self: Box<Self>, stats: OutputStats) -> Result<String> {
        let output = JsonOutput {
            stats,
            results: self.results,
        };
        serde_json::to_string_pretty(&output).context("Cannot format results as JSON")
    }
}
