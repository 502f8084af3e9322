//! Helpers shared by the unit tests

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use wiremock::MockServer;

use crate::cache::{CacheEntry, CacheHandle, CacheKey, SweepReport};
use crate::{Error, ErrorKind, Result, ValidationPolicy, ValidationResult, ValidationTarget, timestamp};

#[macro_export]
/// Creates a mock web server, which responds to every request with a
/// predefined status
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from_u16($status).unwrap());
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any()).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// A successful result for `url`, as a probe would have produced it
pub(crate) fn accessible_result(url: &str) -> ValidationResult {
    ValidationResult {
        identifier: format!("sp:{url}"),
        url: url.to_string(),
        status_code: Some(200),
        final_url: Some(url.to_string()),
        accessible: true,
        redirect_count: 0,
        content_type: Some("text/html".into()),
        error_kind: ErrorKind::None,
        error_detail: None,
        attempts: 1,
        cached: false,
        validated_at: timestamp(),
    }
}

/// A policy without noticeable waits, so retries and throttling don't slow
/// the tests down
pub(crate) fn fast_policy() -> ValidationPolicy {
    ValidationPolicy::builder()
        .concurrency_limit(16)
        .per_host_rate(10_000.0)
        .per_host_burst(100)
        .timeout(Duration::from_secs(5))
        .backoff_base(Duration::from_millis(5))
        .backoff_jitter(Duration::ZERO)
        .build()
}

/// One target per path on `server`
pub(crate) fn targets_for(server: &MockServer, paths: &[&str]) -> Vec<ValidationTarget> {
    paths
        .iter()
        .map(|path| ValidationTarget::new(format!("sp{path}"), format!("{}{path}", server.uri())))
        .collect()
}

/// A cache whose writes or sweeps fail, as a full disk would
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingCache {
    fail_put: bool,
    fail_sweep: bool,
}

impl FailingCache {
    pub(crate) const fn on_put() -> Self {
        Self {
            fail_put: true,
            fail_sweep: false,
        }
    }

    pub(crate) const fn on_sweep() -> Self {
        Self {
            fail_put: false,
            fail_sweep: true,
        }
    }

    fn error() -> Error {
        Error::CacheIo(
            PathBuf::from("/nonexistent"),
            io::Error::other("no space left on device"),
        )
    }
}

impl CacheHandle for FailingCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _value: &ValidationResult, _ttl: Duration) -> Result<()> {
        if self.fail_put {
            return Err(Self::error());
        }
        Ok(())
    }

    fn sweep(&self, _max_entries: usize) -> Result<SweepReport> {
        if self.fail_sweep {
            return Err(Self::error());
        }
        Ok(SweepReport::default())
    }

    fn len(&self) -> usize {
        0
    }
}
