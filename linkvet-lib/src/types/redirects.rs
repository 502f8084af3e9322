use serde::Serialize;
use std::fmt::Display;
use url::Url;

/// A list of URLs that were followed through HTTP redirects,
/// starting from the original URL and ending at the final destination.
/// Each entry in the list represents a step in the redirect sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Redirects(Vec<Url>);

impl From<Vec<Url>> for Redirects {
    fn from(value: Vec<Url>) -> Self {
        Self(value)
    }
}

impl Display for Redirects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = self
            .0
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(" --> ");
        write!(f, "{list}")
    }
}

impl Redirects {
    /// Start a chain at the originally requested URL
    #[must_use]
    pub fn start(url: Url) -> Self {
        Self(vec![url])
    }

    /// Count how many times a redirect was followed.
    /// This is the length of the list minus one.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Whether the chain already passed through `url`
    #[must_use]
    pub fn contains(&self, url: &Url) -> bool {
        self.0.contains(url)
    }

    /// Record the next hop
    pub fn push(&mut self, url: Url) {
        self.0.push(url);
    }

    /// The URL the chain currently ends at
    #[must_use]
    pub fn last(&self) -> Option<&Url> {
        self.0.last()
    }
}
