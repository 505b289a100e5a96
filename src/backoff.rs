//! Backoff strategies for retry policies.
//!
//! `delay(attempt)` is the wait after the failed attempt with 0-based index
//! `attempt`, before the next one starts. Exponential backoff therefore waits
//! `base * 2^attempt`, capped at the configured maximum.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use wordpace::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(1000))
//!     .with_max(Duration::from_secs(10))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(1000));
//! assert_eq!(backoff.delay(1), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(4000));
//! assert_eq!(backoff.delay(4), Duration::from_secs(10)); // capped
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::time::Duration;

/// Upper bound applied when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Constant(Duration),
    /// Doubling delay, optionally capped.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant(delay)
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap an exponential schedule. Rejects zero caps, caps below the base,
    /// and constant schedules.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self {
            Backoff::Exponential { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(max) }),
            Backoff::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant(delay) => (*delay).min(MAX_BACKOFF),
            Backoff::Exponential { base, max } => {
                let exponent = attempt.min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let delay = Duration::from_nanos(nanos as u64);
                max.map_or(delay, |cap| delay.min(cap))
            }
        }
    }
}
