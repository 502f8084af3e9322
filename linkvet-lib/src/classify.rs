use http::StatusCode;

use crate::{
    ErrorKind,
    probe::{RawOutcome, TransportSignal},
};

/// Non-standard status used by some sites (LinkedIn most prominently) to
/// refuse automated clients
const REFUSED_AUTOMATION: u16 = 999;

/// Map a raw probe outcome to the reported failure taxonomy.
///
/// Pure and deterministic: the same outcome always yields the same kind.
#[must_use]
pub fn classify(outcome: &RawOutcome) -> ErrorKind {
    match outcome {
        RawOutcome::Response(response) => {
            if response.protection.is_some() || response.status.as_u16() == REFUSED_AUTOMATION {
                ErrorKind::BlockedByProtection
            } else if is_accessible(response.status) {
                ErrorKind::None
            } else {
                ErrorKind::HttpError
            }
        }
        RawOutcome::Failure(failure) => match failure.signal {
            TransportSignal::Timeout => ErrorKind::Timeout,
            TransportSignal::Connect | TransportSignal::ConnectionReset => {
                ErrorKind::ConnectionFailed
            }
            TransportSignal::Tls => ErrorKind::TlsFailed,
            TransportSignal::RedirectLoop | TransportSignal::TooManyRedirects => {
                ErrorKind::HttpError
            }
            TransportSignal::InvalidUrl => ErrorKind::MalformedUrl,
            TransportSignal::ResponseTooLarge => ErrorKind::TooLarge,
            TransportSignal::Other => ErrorKind::Unknown,
        },
    }
}

/// Success and redirect statuses count as accessible
const fn is_accessible(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200..=399)
}
