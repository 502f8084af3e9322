use std::fmt::{self, Display, Write};

use anyhow::Result;
use linkvet_lib::ratelimit::HostStatsMap;
use linkvet_lib::{BatchStatus, ErrorKind, ValidationResult};

use super::{Formatter, OutputStats};
use crate::formatters::color::{BOLD_PINK, DIM, GREEN, PINK, YELLOW, color};
use crate::formatters::duration::Duration;

/// One line per result as it completes, followed by a summary
pub(crate) struct Plain;

impl Formatter for Plain {
    fn format_result(&mut self, result: ValidationResult) -> Option<String> {
        let mut line = String::new();
        let marker = match result.error_kind {
            ErrorKind::None => GREEN.apply_to("✔"),
            ErrorKind::Unknown => YELLOW.apply_to("?"),
            _ => PINK.apply_to("✗"),
        };
        // Writing to a `String` cannot fail
        let _ = write!(line, "{marker} {result} {}", DIM.apply_to(format!("({})", result.identifier)));
        if result.cached {
            let _ = write!(line, " {}", DIM.apply_to("[cached]"));
        }
        Some(line)
    }

    fn format_stats(self: Box<Self>, stats: OutputStats) -> Result<String> {
        Ok(PlainStats(stats).to_string())
    }
}

struct PlainStats(OutputStats);

impl Display for PlainStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let OutputStats {
            report,
            duration_secs,
            host_stats,
        } = &self.0;

        writeln!(f)?;
        color!(
            f,
            GREEN,
            "{} total in {}, {} accessible",
            report.total,
            Duration::from_secs(*duration_secs),
            report.accessible,
        )?;
        if report.failed > 0 {
            color!(f, BOLD_PINK, ", {} failed", report.failed)?;
        }
        if report.unknown_errors > 0 {
            color!(f, YELLOW, " ({} unclassified)", report.unknown_errors)?;
        }
        writeln!(f)?;
        color!(
            f,
            DIM,
            "Cache: {} hits, {} misses, {} entries\n",
            report.cache.hits,
            report.cache.misses,
            report.cache.entries
        )?;

        match report.status {
            BatchStatus::Completed => {}
            BatchStatus::Cancelled => color!(f, YELLOW, "{}\n", "Cancelled before all targets were dispatched")?,
            BatchStatus::CacheUnavailableDegraded => {
                color!(f, YELLOW, "{}\n", "The cache failed during the run and was bypassed")?;
            }
        }

        if let Some(host_stats) = host_stats {
            write_host_stats(f, host_stats)?;
        }
        Ok(())
    }
}

fn write_host_stats(f: &mut fmt::Formatter<'_>, host_stats: &HostStatsMap) -> fmt::Result {
    if host_stats.is_empty() {
        return Ok(());
    }
    writeln!(f)?;
    writeln!(f, "Per-host statistics")?;
    color!(f, DIM, "{}\n", "─".repeat(60))?;

    let sorted = host_stats.sorted();
    let width = sorted
        .iter()
        .map(|(host, _)| host.as_str().len())
        .max()
        .unwrap_or(0)
        .max(10);
    for (host, stats) in sorted {
        writeln!(f, "{:<width$} │ {}", host.as_str(), stats.summary())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use linkvet_lib::{BatchReport, CacheStats};

    use super::*;

    fn result(error_kind: ErrorKind) -> ValidationResult {
        ValidationResult {
            identifier: "sp-1".into(),
            url: "https://example.org/privacy".into(),
            status_code: Some(404),
            final_url: None,
            accessible: error_kind == ErrorKind::None,
            redirect_count: 0,
            content_type: None,
            error_kind,
            error_detail: (error_kind != ErrorKind::None).then(|| "Not Found".to_string()),
            attempts: 1,
            cached: true,
            validated_at: 0,
        }
    }

    #[test]
    fn test_result_line() {
        let line = Plain.format_result(result(ErrorKind::HttpError)).unwrap();
        let line = console::strip_ansi_codes(&line);
        assert_eq!(
            line,
            "✗ [404] https://example.org/privacy | http_error: Not Found (sp-1) [cached]"
        );
    }

    #[test]
    fn test_summary() {
        let stats = OutputStats {
            report: BatchReport {
                status: BatchStatus::Cancelled,
                cache: CacheStats {
                    hits: 1,
                    misses: 2,
                    entries: 3,
                },
                total: 3,
                accessible: 2,
                failed: 1,
                unknown_errors: 0,
            },
            duration_secs: 61,
            host_stats: None,
        };
        let output = Box::new(Plain).format_stats(stats).unwrap();
        let output = console::strip_ansi_codes(&output);
        assert!(output.contains("3 total in 1m 1s, 2 accessible, 1 failed"));
        assert!(output.contains("Cache: 1 hits, 2 misses, 3 entries"));
        assert!(output.contains("Cancelled"));
    }
}
