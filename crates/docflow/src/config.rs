//! Engine configuration and the conflict retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for calls rejected with a state conflict.
///
/// Only [`StateConflict`](crate::WorkflowError::StateConflict) is ever
/// retried; every other error is returned on the first attempt.
///
/// # Examples
///
/// ```
/// use docflow::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, Duration::from_millis(20));
/// assert_eq!(policy.max_retries(), 3);
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(40)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Report the conflict to the caller.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Delay between each retry.
        delay: Duration,
    },
    /// Exponential backoff.
    ExponentialBackoff {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Delays never exceed this.
        max_delay: Duration,
        /// Factor applied per attempt.
        multiplier: u32,
    },
}

/// Error returned when [`RetryPolicy`] parameters are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl std::fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential policy doubling up to one second.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `multiplier` is 0 or above 10, or if
    /// `max_delay` is less than `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Checks the parameters of a deserialized policy.
    ///
    /// # Errors
    ///
    /// The same as [`RetryPolicy::exponential_backoff`].
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        match self {
            RetryPolicy::ExponentialBackoff {
                max_retries,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                Self::exponential_backoff(*max_retries, *initial_delay, *max_delay, *multiplier)
                    .map(|_| ())
            }
            RetryPolicy::None | RetryPolicy::Fixed { .. } => Ok(()),
        }
    }

    /// Returns the maximum number of retries for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = (*multiplier as u64).saturating_pow(attempt);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

/// Engine settings.
///
/// Every field has a default, so a partial document deserializes.
///
/// ```
/// use docflow::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.lock_timeout, Duration::from_secs(5));
/// assert!(config.gate_unordered_moves);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest wait for a document's lock before failing with a state conflict.
    pub lock_timeout: Duration,
    /// Require the current step's statuses before an arbitrary move in an
    /// unordered circuit.
    pub gate_unordered_moves: bool,
    /// Used by [`WorkflowService::retry_on_conflict`](crate::WorkflowService::retry_on_conflict).
    pub conflict_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            gate_unordered_moves: true,
            conflict_retry: RetryPolicy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_retry_policy_exponential_is_capped() {
        let policy = RetryPolicy::exponential(20, Duration::from_millis(100));
        assert_eq!(
            policy.delay_for_attempt(0),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            policy.delay_for_attempt(2),
            Some(Duration::from_millis(400))
        );
        assert_eq!(policy.delay_for_attempt(19), Some(Duration::from_secs(1)));
        assert_eq!(RetryPolicy::None.delay_for_attempt(0), None);
    }

    #[test]
    fn test_retry_policy_validation() {
        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_millis(100),
            Duration::from_secs(10),
            0,
        );
        assert_eq!(
            result,
            Err(RetryPolicyError("multiplier must be greater than 0"))
        );

        let result = RetryPolicy::exponential_backoff(
            3,
            Duration::from_secs(10),
            Duration::from_millis(100),
            2,
        );
        assert_eq!(
            result,
            Err(RetryPolicyError("max_delay must be >= initial_delay"))
        );
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"gate_unordered_moves": false,
                "conflict_retry": {"kind": "fixed", "max_retries": 2,
                                   "delay": {"secs": 0, "nanos": 5000000}}}"#,
        )
        .expect("valid config");
        assert!(!config.gate_unordered_moves);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(
            config.conflict_retry,
            RetryPolicy::fixed(2, Duration::from_millis(5))
        );
    }
}
