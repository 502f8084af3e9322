use http::{HeaderMap, StatusCode, header};
use serde::Serialize;
use strum::Display;

/// Fingerprint of an anti-automation layer that answered instead of the
/// requested resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProtectionSignature {
    /// Cloudflare managed or JavaScript challenge
    CloudflareChallenge,
    /// Cloudflare block page
    Cloudflare,
    /// DDoS-Guard
    DdosGuard,
    /// Akamai edge block
    Akamai,
    /// Imperva Incapsula
    Incapsula,
}

/// Statuses with which protection layers typically refuse a request
const REFUSAL_STATUSES: [StatusCode; 3] = [
    StatusCode::FORBIDDEN,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// `Server` header values of known protection layers
const SERVERS: &[(&str, ProtectionSignature)] = &[
    ("cloudflare", ProtectionSignature::Cloudflare),
    ("ddos-guard", ProtectionSignature::DdosGuard),
    ("akamaighost", ProtectionSignature::Akamai),
];

/// Body markers of known challenge and block pages
const BODY_MARKERS: &[(&str, ProtectionSignature)] = &[
    ("cf-browser-verification", ProtectionSignature::CloudflareChallenge),
    ("challenge-platform", ProtectionSignature::CloudflareChallenge),
    ("Attention Required! | Cloudflare", ProtectionSignature::Cloudflare),
    ("_Incapsula_Resource", ProtectionSignature::Incapsula),
    ("DDoS protection by", ProtectionSignature::DdosGuard),
];

/// Look for a protection layer in the response head
pub(crate) fn from_headers(status: StatusCode, headers: &HeaderMap) -> Option<ProtectionSignature> {
    let mitigated = headers
        .get("cf-mitigated")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("challenge"));
    if mitigated {
        return Some(ProtectionSignature::CloudflareChallenge);
    }

    if !REFUSAL_STATUSES.contains(&status) {
        return None;
    }
    let server = headers.get(header::SERVER)?.to_str().ok()?.to_ascii_lowercase();
    SERVERS
        .iter()
        .find(|(name, _)| server.contains(name))
        .map(|(_, signature)| *signature)
}

/// Look for a challenge page in the first bytes of a body
pub(crate) fn from_body(body: &[u8]) -> Option<ProtectionSignature> {
    let text = String::from_utf8_lossy(body);
    BODY_MARKERS
        .iter()
        .find(|(marker, _)| text.contains(marker))
        .map(|(_, signature)| *signature)
}
