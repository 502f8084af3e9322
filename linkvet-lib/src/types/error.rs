use std::path::PathBuf;

use thiserror::Error;

/// Errors which can abort a `linkvet` operation as a whole.
///
/// Failures of individual targets are never reported through this type:
/// they are part of the [`ValidationResult`](crate::ValidationResult)
/// as an [`ErrorKind`](crate::ErrorKind).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The validation policy is unusable, e.g. it allows zero concurrent requests
    #[error("Invalid validation policy: {0}")]
    InvalidPolicy(String),

    /// The cache medium cannot be created or written to
    #[error("Cache at `{}` is unavailable: {}", .0.display(), .1)]
    CacheUnavailable(PathBuf, #[source] std::io::Error),

    /// Reading an existing cache entry failed for a reason other than absence
    #[error("Failed to read cache entry `{}`: {}", .0.display(), .1)]
    CacheIo(PathBuf, #[source] std::io::Error),

    /// A cache entry could not be serialized
    #[error("Cannot encode cache entry `{}`: {}", .0.display(), .1)]
    CacheFormat(PathBuf, #[source] serde_json::Error),

    /// The HTTP client could not be constructed
    #[error("Error creating request client: {0}")]
    BuildClient(#[source] reqwest::Error),

    /// The configured user agent is not a valid header value
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// A URL without a host cannot be rate limited
    #[error("URL is missing a host: {0}")]
    MissingHost(String),

    /// A batch worker or the batch driver panicked or was aborted
    #[error("Validation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The result type used throughout `linkvet_lib`
pub type Result<T> = std::result::Result<T, Error>;
