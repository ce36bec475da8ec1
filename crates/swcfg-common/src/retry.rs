//! Retry bound for auto-commit updates.
//!
//! An auto-committed update that fails is undone by swapping the attribute
//! snapshots and applying again. The number of apply attempts is bounded by
//! a [`RetryPolicy`].

use serde::{Deserialize, Serialize};

/// Default number of apply attempts per auto-committed update.
pub const DEFAULT_UPDATE_RETRY_MAX: usize = 2;

/// Bound on auto-commit apply attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "usize", into = "usize")]
pub struct RetryPolicy {
    max_attempts: usize,
}

impl RetryPolicy {
    /// Creates a policy; at least one attempt is always made.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Attempt indices, starting at zero.
    pub fn attempts(&self) -> std::ops::Range<usize> {
        0..self.max_attempts
    }
}

impl From<usize> for RetryPolicy {
    fn from(max_attempts: usize) -> Self {
        Self::new(max_attempts)
    }
}

impl From<RetryPolicy> for usize {
    fn from(policy: RetryPolicy) -> Self {
        policy.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_RETRY_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bound() {
        assert_eq!(RetryPolicy::default().max_attempts(), DEFAULT_UPDATE_RETRY_MAX);
    }

    #[test]
    fn test_zero_is_clamped() {
        assert_eq!(RetryPolicy::new(0).attempts().count(), 1);
    }

    #[test]
    fn test_serde_as_plain_number() {
        let policy: RetryPolicy = serde_json::from_str("5").unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(serde_json::to_string(&policy).unwrap(), "5");

        let policy: RetryPolicy = serde_json::from_str("0").unwrap();
        assert_eq!(policy.max_attempts(), 1);
    }
}
