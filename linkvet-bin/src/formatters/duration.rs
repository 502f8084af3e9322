use std::fmt;

/// Wrapper struct around `elapsed.as_secs()` for custom formatting.
pub(crate) struct Duration {
    elapsed: u64,
}

impl Duration {
    /// Create a new `Duration` from the given number of seconds.
    pub(crate) const fn from_secs(elapsed: u64) -> Self {
        Self { elapsed }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.elapsed / 3600;
        let minutes = (self.elapsed % 3600) / 60;
        let seconds = self.elapsed % 60;

        if hours > 0 {
            write!(f, "{hours}h {minutes}m {seconds}s")
        } else if minutes > 0 {
            write!(f, "{minutes}m {seconds}s")
        } else {
            write!(f, "{seconds}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting() {
        assert_eq!(Duration::from_secs(0).to_string(), "0s");
        assert_eq!(Duration::from_secs(61).to_string(), "1m 1s");
        assert_eq!(Duration::from_secs(3661).to_string(), "1h 1m 1s");
        // Batches longer than a day still count in hours
        assert_eq!(Duration::from_secs(90061).to_string(), "25h 1m 1s");
    }
}
