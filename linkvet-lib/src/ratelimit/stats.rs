use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use serde::ser::SerializeStruct;

use super::HostKey;

/// Number of request durations kept for the median
const REQUEST_TIME_WINDOW: usize = 1000;

/// Host statistics keyed and ordered by host
#[derive(Debug, Default, Serialize)]
pub struct HostStatsMap(BTreeMap<HostKey, HostStats>);

impl HostStatsMap {
    /// Host statistics sorted by request count (descending order)
    #[must_use]
    pub fn sorted(&self) -> Vec<(&HostKey, &HostStats)> {
        let mut hosts: Vec<_> = self.0.iter().collect();
        hosts.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total_requests));
        hosts
    }

    /// Statistics for a single host
    #[must_use]
    pub fn get(&self, host: &HostKey) -> Option<&HostStats> {
        self.0.get(host)
    }

    /// Number of hosts seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no host was contacted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(HostKey, HostStats)> for HostStatsMap {
    fn from_iter<T: IntoIterator<Item = (HostKey, HostStats)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What was observed while talking to one host
#[derive(Debug, Clone, Default)]
pub struct HostStats {
    /// Total number of requests made to this host
    pub total_requests: u64,
    /// Requests answered with a success or redirect status
    pub successful_requests: u64,
    /// Requests answered with 429 Too Many Requests
    pub rate_limited: u64,
    /// Server error responses (5xx)
    pub server_errors: u64,
    /// Client error responses (4xx, excluding 429)
    pub client_errors: u64,
    /// Requests which got no response at all
    pub transport_failures: u64,
    /// Targets answered from the result cache
    pub cache_hits: u64,
    /// Total time spent waiting for the host's token bucket
    pub throttled: Duration,
    request_times: VecDeque<Duration>,
}

impl HostStats {
    /// Record a response with status code and request duration
    pub fn record_response(&mut self, status_code: u16, request_time: Duration) {
        self.total_requests += 1;
        match status_code {
            200..=399 => self.successful_requests += 1,
            429 => self.rate_limited += 1,
            400..=499 => self.client_errors += 1,
            500..=599 => self.server_errors += 1,
            _ => {}
        }
        self.push_request_time(request_time);
    }

    /// Record a request which failed below HTTP
    pub fn record_failure(&mut self, request_time: Duration) {
        self.total_requests += 1;
        self.transport_failures += 1;
        self.push_request_time(request_time);
    }

    /// Record a target answered from the cache
    pub const fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    /// Record time spent waiting for a permit
    pub fn record_throttled(&mut self, waited: Duration) {
        self.throttled += waited;
    }

    fn push_request_time(&mut self, request_time: Duration) {
        if self.request_times.len() >= REQUEST_TIME_WINDOW {
            self.request_times.pop_front();
        }
        self.request_times.push_back(request_time);
    }

    /// Median of the most recent request durations
    #[must_use]
    pub fn median_request_time(&self) -> Option<Duration> {
        if self.request_times.is_empty() {
            return None;
        }
        let mut times: Vec<_> = self.request_times.iter().copied().collect();
        times.sort();
        let mid = times.len() / 2;
        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Share of requests which ended in an error (0.0 to 1.0)
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let errors =
            self.rate_limited + self.client_errors + self.server_errors + self.transport_failures;
        #[allow(clippy::cast_precision_loss)]
        let rate = errors as f64 / self.total_requests as f64;
        rate
    }

    /// One-line human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let error_pct = (self.error_rate() * 100.0).round() as u64;
        let median = self
            .median_request_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{}ms", d.as_millis()));
        format!(
            "{} requests ({}% errors), {} cached, median: {}, throttled: {}ms",
            self.total_requests,
            error_pct,
            self.cache_hits,
            median,
            self.throttled.as_millis()
        )
    }
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let median_request_time_ms = self.median_request_time().map(|d| d.as_millis());

        let mut s = serializer.serialize_struct("HostStats", 9)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("successful_requests", &self.successful_requests)?;
        s.serialize_field("rate_limited", &self.rate_limited)?;
        s.serialize_field("client_errors", &self.client_errors)?;
        s.serialize_field("server_errors", &self.server_errors)?;
        s.serialize_field("transport_failures", &self.transport_failures)?;
        s.serialize_field("cache_hits", &self.cache_hits)?;
        s.serialize_field("throttled_ms", &self.throttled.as_millis())?;
        s.serialize_field("median_request_time_ms", &median_request_time_ms)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_host_stats_tracking() {
        let mut stats = HostStats::default();
        assert!(stats.error_rate().abs() < f64::EPSILON);

        stats.record_response(200, Duration::from_millis(100));
        stats.record_response(301, Duration::from_millis(120));
        stats.record_response(429, Duration::from_millis(150));
        stats.record_failure(Duration::from_millis(300));

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.transport_failures, 1);
        assert!((stats.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            stats.median_request_time(),
            Some(Duration::from_millis(135))
        );
    }

    #[test]
    fn test_cache_hits_are_not_requests() {
        let mut stats = HostStats::default();
        stats.record_cache_hit();
        stats.record_throttled(Duration::from_millis(40));
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.cache_hits, 1);
        assert!(stats.summary().contains("throttled: 40ms"));
    }

    #[test]
    fn test_sorted_by_requests() {
        let mut busy = HostStats::default();
        busy.record_response(200, Duration::from_millis(1));
        busy.record_response(200, Duration::from_millis(1));
        let mut quiet = HostStats::default();
        quiet.record_response(500, Duration::from_millis(1));

        let map: HostStatsMap = [
            (HostKey::from("a.example.org"), quiet),
            (HostKey::from("b.example.org"), busy),
        ]
        .into_iter()
        .collect();
        let sorted = map.sorted();
        assert_eq!(sorted[0].0.as_str(), "b.example.org");
        assert_eq!(sorted[1].0.as_str(), "a.example.org");
    }

    #[test]
    fn test_serialized_fields() {
        let mut stats = HostStats::default();
        stats.record_response(503, Duration::from_millis(10));
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["server_errors"], 1);
        assert_eq!(json["median_request_time_ms"], 10);
    }
}
