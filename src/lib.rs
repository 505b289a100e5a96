#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # wordpace
//!
//! Paced, retrying, cached access to an AI word-information provider, as used
//! by a flashcard app to look up words without tripping the provider's quota.
//!
//! ## Features
//!
//! - **Rate limiter**: single-flight FIFO queue with a window quota and a
//!   minimum spacing between dispatches, shared by every caller
//! - **Retry policy** with capped exponential backoff and optional jitter
//! - **Response cache** keyed by the normalized word, with optional TTL and LRU bound
//! - **Cancellation** of queued requests and backoff sleeps
//! - **Tower layer** to put any `Service` behind a shared limiter
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::json;
//! use wordpace::{FetchError, WordInfoService, WordSource};
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl WordSource for Canned {
//!     async fn fetch(&self, word: &str, _language: &str) -> Result<serde_json::Value, FetchError> {
//!         Ok(json!({ "word": word, "meaning": "a fruit" }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = WordInfoService::new(Canned).unwrap();
//!     let info = service.fetch_word_info("Apple", "en").await.unwrap();
//!     assert_eq!(info.meaning, "a fruit");
//!     assert!(service.cache().has("apple"));
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod sleeper;
pub mod word_info;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use cache::{CacheEntry, ResponseCache};
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CacheConfig, LimiterConfig, RetryConfig, ServiceConfig};
pub use error::{Cancelled, ConfigError, ErrorKind, FetchError, LimiterError};
pub use jitter::Jitter;
pub use rate_limit::{
    LimiterStatus, Pending, RateLimitLayer, RateLimitService, RateLimiter, RateLimiterBuilder,
};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use service::{WordInfoService, WordInfoServiceBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use word_info::{cache_key, WordInfo, WordSource};
