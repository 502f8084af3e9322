use std::fmt::Display;

use serde::{Deserialize, Serialize};
use url::Url;

/// Schemes which can be probed over HTTP
const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

/// One `(identifier, url)` pair to validate.
///
/// The identifier is opaque to `linkvet` (typically the entity a link was
/// harvested from); the URL is the raw, un-normalized candidate link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationTarget {
    /// Caller-defined reference, e.g. an entity ID
    pub identifier: String,
    /// The link as it was found
    pub url: String,
}

impl ValidationTarget {
    /// Create a new target
    #[must_use]
    pub fn new(identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: url.into(),
        }
    }

    /// Parse the raw URL into something the probe can request.
    ///
    /// Leading and trailing whitespace is ignored. The fragment is dropped
    /// because it is never sent to the server.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason if the URL cannot be parsed, has a
    /// scheme other than `http`/`https` or has no host.
    pub fn parse_url(&self) -> Result<Url, String> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err("URL is empty".to_string());
        }
        let mut url = Url::parse(raw).map_err(|e| format!("Invalid URL `{raw}`: {e}"))?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(format!("Unsupported URL scheme `{}`", url.scheme()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(format!("URL `{raw}` is missing a host"));
        }
        url.set_fragment(None);
        Ok(url)
    }
}

impl<I, U> From<(I, U)> for ValidationTarget
where
    I: Into<String>,
    U: Into<String>,
{
    fn from((identifier, url): (I, U)) -> Self {
        Self::new(identifier, url)
    }
}

impl Display for ValidationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ValidationTarget;

    #[test]
    fn test_parse_normalizes() {
        let target = ValidationTarget::new("idp", "  HTTPS://Example.ORG/Privacy#section ");
        let url = target.parse_url().unwrap();
        assert_eq!(url.as_str(), "https://example.org/Privacy");
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("not a url")]
    #[case("ftp://example.org/privacy")]
    #[case("mailto:privacy@example.org")]
    #[case("https://")]
    #[case("/relative/privacy.html")]
    fn test_parse_rejects(#[case] raw: &str) {
        assert!(ValidationTarget::new("idp", raw).parse_url().is_err());
    }

    #[test]
    fn test_from_tuple() {
        let target = ValidationTarget::from(("sp", "https://example.org"));
        assert_eq!(target.identifier, "sp");
        assert_eq!(target.url, "https://example.org");
    }
}
