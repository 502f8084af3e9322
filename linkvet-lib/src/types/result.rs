use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

use crate::{
    probe::RawOutcome,
    retry::Attempted,
    time::{Timestamp, timestamp},
    types::ValidationTarget,
};

/// The closed failure taxonomy used for reporting.
///
/// Exactly one kind is attached to every [`ValidationResult`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The final response had a status in `200..=399`
    #[default]
    None,
    /// The server did not answer within the configured timeout
    Timeout,
    /// DNS lookup, connect or the connection itself failed
    ConnectionFailed,
    /// The TLS handshake or certificate validation failed
    TlsFailed,
    /// The server answered with a non-success status, or redirects looped
    /// or exceeded the hop limit
    HttpError,
    /// An anti-automation challenge answered instead of the resource
    BlockedByProtection,
    /// The URL could not be parsed or has an unsupported scheme
    MalformedUrl,
    /// The response exceeded what the probe is willing to read
    TooLarge,
    /// Anything the classifier has no rule for
    Unknown,
}

/// The outcome of validating a single [`ValidationTarget`].
///
/// Produced exactly once per target and pass. This is also the value stored
/// in the cache, so every field added later must be optional or defaulted to
/// keep older cache files readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The caller's identifier of the target
    pub identifier: String,
    /// The URL as supplied by the caller
    pub url: String,
    /// Status code of the final response, if any response arrived
    #[serde(default)]
    pub status_code: Option<u16>,
    /// URL of the final response after following redirects
    #[serde(default)]
    pub final_url: Option<String>,
    /// `true` iff the final status is in `200..=399` and no terminal error occurred
    pub accessible: bool,
    /// Number of redirects followed
    #[serde(default)]
    pub redirect_count: u32,
    /// `Content-Type` of the final response
    #[serde(default)]
    pub content_type: Option<String>,
    /// Failure classification, [`ErrorKind::None`] on success
    pub error_kind: ErrorKind,
    /// Human-readable detail about the failure
    #[serde(default)]
    pub error_detail: Option<String>,
    /// Number of probe invocations spent on this result
    #[serde(default)]
    pub attempts: u32,
    /// Whether this result was served from the cache
    #[serde(default)]
    pub cached: bool,
    /// When the result was produced
    pub validated_at: Timestamp,
}

impl ValidationResult {
    /// Result for a target whose URL cannot be requested at all
    #[must_use]
    pub fn malformed(target: ValidationTarget, detail: String) -> Self {
        Self {
            identifier: target.identifier,
            url: target.url,
            status_code: None,
            final_url: None,
            accessible: false,
            redirect_count: 0,
            content_type: None,
            error_kind: ErrorKind::MalformedUrl,
            error_detail: Some(detail),
            attempts: 0,
            cached: false,
            validated_at: timestamp(),
        }
    }

    /// Build the result of a probe run from its last raw outcome and the
    /// classification of that outcome.
    #[must_use]
    pub fn from_outcome(
        target: ValidationTarget,
        attempted: Attempted<RawOutcome>,
        error_kind: ErrorKind,
    ) -> Self {
        let Attempted { outcome, attempts } = attempted;
        let accessible = error_kind == ErrorKind::None;
        let mut result = Self {
            identifier: target.identifier,
            url: target.url,
            status_code: None,
            final_url: None,
            accessible,
            redirect_count: 0,
            content_type: None,
            error_kind,
            error_detail: None,
            attempts,
            cached: false,
            validated_at: timestamp(),
        };

        match outcome {
            RawOutcome::Response(response) => {
                result.status_code = Some(response.status.as_u16());
                result.final_url = Some(response.final_url.to_string());
                result.redirect_count = response.redirect_count;
                result.content_type = response.content_type;
                result.error_detail = match (error_kind, response.protection) {
                    (ErrorKind::None, _) => None,
                    (_, Some(signature)) => Some(format!("Blocked by protection: {signature}")),
                    (_, None) => Some(
                        response
                            .status
                            .canonical_reason()
                            .map_or_else(|| response.status.to_string(), String::from),
                    ),
                };
            }
            RawOutcome::Failure(failure) => {
                result.redirect_count = failure.redirect_count;
                result.error_detail = Some(failure.detail);
            }
        }
        result
    }

    /// Re-attach a cached result to the target that asked for it.
    ///
    /// Cache keys are derived from the URL alone, so the stored result may
    /// originate from a different identifier.
    #[must_use]
    pub fn for_cached_target(mut self, target: ValidationTarget) -> Self {
        self.identifier = target.identifier;
        self.url = target.url;
        self.cached = true;
        self
    }
}

impl Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "[{code}] {}", self.url)?,
            None => write!(f, "[ERR] {}", self.url)?,
        }
        if let Some(detail) = &self.error_detail {
            write!(f, " | {}: {detail}", self.error_kind)?;
        }
        Ok(())
    }
}
