//! Eviction policy: which sessions to reclaim.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// What a policy is allowed to know about a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub last_activity: DateTime<Utc>,
}

/// Decides which sessions are expired and which one to force out at capacity.
///
/// Candidates are passed in store insertion order.
pub trait EvictionPolicy: Send + Sync {
    /// Ids of every candidate that is expired at `now`.
    fn expired(&self, candidates: &[EvictionCandidate], now: DateTime<Utc>) -> Vec<String>;

    /// The single candidate to evict when the store is full and nothing expired.
    fn force_victim(&self, candidates: &[EvictionCandidate]) -> Option<String>;
}

/// Expire sessions idle for longer than `timeout`; at capacity, evict the one
/// idle longest (ties go to the earliest inserted).
///
/// A zero timeout disables idle expiry.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeoutPolicy {
    timeout: Duration,
}

impl IdleTimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl EvictionPolicy for IdleTimeoutPolicy {
    fn expired(&self, candidates: &[EvictionCandidate], now: DateTime<Utc>) -> Vec<String> {
        if self.timeout.is_zero() {
            return Vec::new();
        }
        candidates
            .iter()
            .filter(|c| {
                // Negative idle time (clock skew) never expires.
                (now - c.last_activity)
                    .to_std()
                    .map(|idle| idle > self.timeout)
                    .unwrap_or(false)
            })
            .map(|c| c.id.clone())
            .collect()
    }

    fn force_victim(&self, candidates: &[EvictionCandidate]) -> Option<String> {
        // min_by_key keeps the first of equal minima.
        candidates
            .iter()
            .min_by_key(|c| c.last_activity)
            .map(|c| c.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Span;

    fn candidate(id: &str, at: DateTime<Utc>) -> EvictionCandidate {
        EvictionCandidate {
            id: id.to_string(),
            last_activity: at,
        }
    }

    #[test]
    fn test_expiry_is_strictly_greater() {
        let now = Utc::now();
        let policy = IdleTimeoutPolicy::new(Duration::from_secs(60));
        let candidates = vec![
            candidate("exact", now - Span::seconds(60)),
            candidate("stale", now - Span::seconds(61)),
            candidate("fresh", now),
        ];
        assert_eq!(policy.expired(&candidates, now), vec!["stale".to_string()]);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let now = Utc::now();
        let policy = IdleTimeoutPolicy::new(Duration::ZERO);
        let candidates = vec![candidate("ancient", now - Span::days(30))];
        assert!(policy.expired(&candidates, now).is_empty());
    }

    #[test]
    fn test_force_victim_is_least_recently_active() {
        let now = Utc::now();
        let policy = IdleTimeoutPolicy::new(Duration::from_secs(3600));
        let candidates = vec![
            candidate("b", now - Span::seconds(5)),
            candidate("a", now - Span::seconds(10)),
            candidate("c", now),
        ];
        assert_eq!(policy.force_victim(&candidates), Some("a".to_string()));
    }

    #[test]
    fn test_force_victim_ties_go_to_insertion_order() {
        let now = Utc::now();
        let policy = IdleTimeoutPolicy::new(Duration::from_secs(3600));
        let candidates = vec![candidate("first", now), candidate("second", now)];
        assert_eq!(policy.force_victim(&candidates), Some("first".to_string()));
        assert_eq!(policy.force_victim(&[]), None);
    }
}
