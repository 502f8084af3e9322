use std::error::Error;
use std::io;

use serde::{Deserialize, Serialize};
use strum::Display;

/// What went wrong below HTTP, extracted from the `reqwest` error chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransportSignal {
    /// No response within the request timeout
    Timeout,
    /// DNS lookup or TCP connect failed
    Connect,
    /// The connection broke after it was established
    ConnectionReset,
    /// TLS handshake or certificate validation failed
    Tls,
    /// A redirect pointed back into the chain already followed
    RedirectLoop,
    /// More redirects than allowed
    TooManyRedirects,
    /// The URL (or a redirect target) cannot be requested
    InvalidUrl,
    /// The response head exceeded what the client accepts
    ResponseTooLarge,
    /// Anything not recognized above
    Other,
}

/// A rule mapping message fragments to a signal
struct SignalRule {
    patterns: &'static [&'static str],
    signal: TransportSignal,
}

impl SignalRule {
    const fn new(patterns: &'static [&'static str], signal: TransportSignal) -> Self {
        Self { patterns, signal }
    }

    fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| text.contains(pattern))
    }
}

/// Message based rules, checked in order against every error in the chain.
/// Certificate problems are reported by the TLS backends only as text.
const RULES: &[SignalRule] = &[
    SignalRule::new(
        &["certificate", "handshake", "ssl", "tls"],
        TransportSignal::Tls,
    ),
    SignalRule::new(&["message head is too large"], TransportSignal::ResponseTooLarge),
    SignalRule::new(
        &[
            "dns error",
            "failed to lookup address",
            "name resolution",
            "no record found",
            "connection refused",
            "no route to host",
            "network is unreachable",
        ],
        TransportSignal::Connect,
    ),
    SignalRule::new(
        &["connection reset", "connection closed", "broken pipe"],
        TransportSignal::ConnectionReset,
    ),
    SignalRule::new(&["timed out", "deadline has elapsed"], TransportSignal::Timeout),
];

/// Extract the transport signal and a human-readable detail from an error
pub(crate) fn analyze(error: &reqwest::Error) -> (TransportSignal, String) {
    (signal(error), describe(error))
}

fn signal(error: &reqwest::Error) -> TransportSignal {
    if error.is_timeout() {
        return TransportSignal::Timeout;
    }
    if error.is_builder() {
        return TransportSignal::InvalidUrl;
    }
    if error.is_redirect() {
        return TransportSignal::TooManyRedirects;
    }

    let mut source = error.source();
    while let Some(err) = source {
        if let Some(signal) = analyze_source(err) {
            return signal;
        }
        source = err.source();
    }

    if error.is_connect() {
        TransportSignal::Connect
    } else if error.is_body() || error.is_decode() {
        TransportSignal::ConnectionReset
    } else {
        TransportSignal::Other
    }
}

/// Classify a single error of the chain, if it is specific enough
fn analyze_source(err: &(dyn Error + 'static)) -> Option<TransportSignal> {
    if let Some(hyper_error) = err.downcast_ref::<hyper::Error>() {
        if hyper_error.is_parse_too_large() {
            return Some(TransportSignal::ResponseTooLarge);
        }
        if hyper_error.is_timeout() {
            return Some(TransportSignal::Timeout);
        }
        if hyper_error.is_incomplete_message() || hyper_error.is_canceled() || hyper_error.is_closed()
        {
            return Some(TransportSignal::ConnectionReset);
        }
    }

    if let Some(io_error) = err.downcast_ref::<io::Error>()
        && let Some(signal) = analyze_io_error(io_error)
    {
        return Some(signal);
    }

    if err.downcast_ref::<url::ParseError>().is_some() {
        return Some(TransportSignal::InvalidUrl);
    }

    let message = err.to_string().to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&message))
        .map(|rule| rule.signal)
}

fn analyze_io_error(io_error: &io::Error) -> Option<TransportSignal> {
    match io_error.kind() {
        io::ErrorKind::TimedOut => Some(TransportSignal::Timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable => Some(TransportSignal::Connect),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(TransportSignal::ConnectionReset),
        // TLS backends wrap their errors in `Other`; leave those to the rules
        _ => None,
    }
}

/// Join the messages of the whole chain, skipping repetitions
fn describe(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        let message = err.to_string();
        if parts.last().is_none_or(|last| !last.contains(&message)) {
            parts.push(message);
        }
        source = err.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, Some(TransportSignal::Connect))]
    #[case(io::ErrorKind::ConnectionReset, Some(TransportSignal::ConnectionReset))]
    #[case(io::ErrorKind::TimedOut, Some(TransportSignal::Timeout))]
    #[case(io::ErrorKind::Other, None)]
    fn test_io_error_kinds(#[case] kind: io::ErrorKind, #[case] expected: Option<TransportSignal>) {
        assert_eq!(analyze_io_error(&io::Error::from(kind)), expected);
    }

    #[rstest]
    #[case("invalid peer certificate: UnknownIssuer", Some(TransportSignal::Tls))]
    #[case("error:0A000086:SSL routines::certificate verify failed", Some(TransportSignal::Tls))]
    #[case("dns error: failed to lookup address information", Some(TransportSignal::Connect))]
    #[case("something else entirely", None)]
    fn test_message_rules(#[case] message: &str, #[case] expected: Option<TransportSignal>) {
        let error = io::Error::other(message.to_string());
        assert_eq!(analyze_source(&error), expected);
    }

    #[test]
    fn test_url_parse_error() {
        let error = url::ParseError::EmptyHost;
        assert_eq!(analyze_source(&error), Some(TransportSignal::InvalidUrl));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = reqwest::get(format!("http://{addr}/")).await.unwrap_err();
        let (signal, detail) = analyze(&error);
        assert_eq!(signal, TransportSignal::Connect);
        assert!(!detail.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransportSignal::ConnectionReset.to_string(), "connection_reset");
    }
}
