//! Retry policy with configurable backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between retries grows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay every retry
    Fixed,
    /// Delay grows linearly with the attempt number
    Linear,
    /// Delay doubles each retry
    #[default]
    Exponential,
}

/// Retry configuration attached to a task
///
/// The first call is attempt 0; retries are numbered 1 through
/// `max_retries`.
///
/// # Example
///
/// ```
/// use conductor_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_retries(3)
///     .with_initial_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_secs(10));
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Backoff shape
    #[serde(default)]
    pub backoff_type: BackoffKind,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Ceiling on any single delay
    #[serde(
        default,
        with = "option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults: 3 retries starting at
    /// one second, capped at one minute
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            backoff_type: BackoffKind::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(60)),
        }
    }

    /// Fixed-interval retries
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_type: BackoffKind::Fixed,
            initial_delay: delay,
            max_delay: None,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff_type: BackoffKind::Fixed,
            initial_delay: Duration::ZERO,
            max_delay: None,
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff shape
    pub fn with_backoff(mut self, kind: BackoffKind) -> Self {
        self.backoff_type = kind;
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Whether another retry is allowed after `retries_so_far` retries
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry `attempt` (1-based; attempt 0 is the initial
    /// call and has no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = match self.backoff_type {
            BackoffKind::Fixed => self.initial_delay,
            BackoffKind::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor)
            }
        };

        match self.max_delay {
            Some(cap) => base.min(cap),
            None => base,
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
