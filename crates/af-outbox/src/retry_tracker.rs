use std::collections::HashMap;
use std::time::Duration;

/// Failed-delivery counts keyed by outbox message id.
///
/// Lives only in memory: a process restart forgets every count and messages
/// start again from zero.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: HashMap<String, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures recorded so far, 0 for unknown ids.
    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.attempts.get(id).copied()
    }

    /// Bump the count for `id` and return the new value.
    pub fn record_failure(&mut self, id: &str) -> u32 {
        let count = self.attempts.entry(id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn clear(&mut self, id: &str) -> Option<u32> {
        self.attempts.remove(id)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// `base * 2^attempts`, saturating.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        let mut tracker = RetryTracker::new();
        assert_eq!(tracker.attempts("a"), 0);
        assert_eq!(tracker.get("a"), None);

        assert_eq!(tracker.record_failure("a"), 1);
        assert_eq!(tracker.record_failure("a"), 2);
        assert_eq!(tracker.record_failure("b"), 1);
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.clear("a"), Some(2));
        assert_eq!(tracker.attempts("a"), 0);
        assert_eq!(tracker.clear("a"), None);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let minute = Duration::from_secs(60);
        assert_eq!(backoff_delay(minute, 0), Duration::from_secs(60));
        assert_eq!(backoff_delay(minute, 1), Duration::from_secs(120));
        assert_eq!(backoff_delay(minute, 4), Duration::from_secs(960));
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 2), Duration::MAX);
        assert_eq!(
            backoff_delay(Duration::from_secs(1), 200),
            Duration::from_secs(u64::from(u32::MAX))
        );
        assert_eq!(backoff_delay(Duration::ZERO, 10), Duration::ZERO);
    }
}
