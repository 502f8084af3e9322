use http::HeaderValue;
use std::time::{Duration, SystemTime};

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Returns `None` for values which are neither delay-seconds nor an HTTP
/// date. A date in the past means "retry now".
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let value = value.to_str().ok()?.trim();

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    Some(
        date.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
