use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy with exponential backoff and an attempt limit.
///
/// Used by transport adapters for connect retries. All fields have
/// serde defaults so that a policy can be configured partially or not
/// at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts (None = unlimited).
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Initial retry interval in milliseconds.
    #[serde(default = "RetryPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum retry interval cap in milliseconds.
    #[serde(default = "RetryPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Randomization factor in range [0.0, 1.0]; 0.2 means ±20% jitter.
    #[serde(default = "RetryPolicy::default_randomization_factor")]
    pub randomization_factor: f64,

    /// Multiplicative factor for each retry step.
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,

    /// Optional maximum total elapsed time in milliseconds.
    #[serde(default)]
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time_ms: None,
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> Option<u32> {
        Some(3)
    }

    fn default_initial_interval_ms() -> u64 {
        500
    }

    fn default_max_interval_ms() -> u64 {
        10_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    /// A policy that fails on the first error without retrying.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }
}

/// Build an `ExponentialBackoff` from a [`RetryPolicy`].
///
/// `max_attempts` is not part of the backoff state; callers count
/// attempts themselves.
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(policy.initial_interval_ms.max(1)),
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}
