//! Convenient re-exports for common wordpace types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    cancel::CancelToken,
    config::{LimiterConfig, RetryConfig, ServiceConfig},
    error::{ErrorKind, FetchError, LimiterError},
    jitter::Jitter,
    rate_limit::{LimiterStatus, RateLimitLayer, RateLimiter},
    retry::{RetryPolicy, RetryPolicyBuilder},
    service::WordInfoService,
    word_info::{WordInfo, WordSource},
};
