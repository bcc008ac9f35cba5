//! Log throttling utility
//!
//! Input events arrive at pointer-move rate, so "dropped" messages on a
//! closed channel would flood the log. The throttler lets one message per
//! key through per interval and counts the rest.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Log throttler that limits how often the same message is logged
///
/// # Example
///
/// ```rust
/// use cloudapp_rtc::utils::LogThrottler;
/// use std::time::Duration;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
///
/// assert_eq!(throttler.should_log("input_dropped"), Some(0));
/// assert_eq!(throttler.should_log("input_dropped"), None);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<&'static str, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check if a message should be logged
    ///
    /// Returns `Some(n)` when the message should be logged, where `n` is how
    /// many messages for this key were suppressed since the last one.
    /// Returns `None` when throttled.
    pub fn should_log(&self, key: &'static str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key,
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Clear throttle state for a key once its condition recovers
    pub fn clear(&self, key: &'static str) {
        self.entries.lock().remove(key);
    }
}

impl Default for LogThrottler {
    /// Create a default log throttler with 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_counts_suppressed() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.should_log("k"), Some(0));
        assert_eq!(throttler.should_log("k"), None);
        assert_eq!(throttler.should_log("k"), None);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(throttler.should_log("k"), Some(2));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(60);
        assert!(throttler.should_log("a").is_some());
        assert!(throttler.should_log("b").is_some());
        assert!(throttler.should_log("a").is_none());
    }

    #[test]
    fn test_clear_allows_next_message() {
        let throttler = LogThrottler::with_secs(60);
        assert!(throttler.should_log("a").is_some());
        assert!(throttler.should_log("a").is_none());

        throttler.clear("a");
        assert_eq!(throttler.should_log("a"), Some(0));
    }
}
