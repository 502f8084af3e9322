use std::time::SystemTime;

/// Seconds since the UNIX epoch
pub type Timestamp = u64;

/// Get the current UNIX timestamp
///
/// A clock set before the epoch yields `0` instead of an error.
#[must_use]
pub fn timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
