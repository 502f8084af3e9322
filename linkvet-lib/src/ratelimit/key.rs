use serde::Serialize;
use std::fmt;
use url::Url;

use crate::{Error, Result};

/// A hostname as used for rate limiting.
///
/// Two URLs share a token bucket iff their hosts compare equal after
/// lowercasing. Ports are ignored, subdomains are not merged.
///
/// # Examples
///
/// ```
/// use linkvet_lib::ratelimit::HostKey;
/// use url::Url;
///
/// let url = Url::parse("https://WWW.Example.org:8443/privacy").unwrap();
/// let host_key = HostKey::try_from(&url).unwrap();
/// assert_eq!(host_key.as_str(), "www.example.org");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HostKey(String);

impl HostKey {
    /// Get the hostname as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&Url> for HostKey {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self> {
        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(Self(host.to_lowercase())),
            _ => Err(Error::MissingHost(url.to_string())),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostKey {
    fn from(host: &str) -> Self {
        Self(host.to_lowercase())
    }
}
