//! Configuration for pacing, retries, caching and the word service.
//!
//! Every struct deserializes with per-field defaults, so a config document
//! only needs to name what it overrides:
//!
//! ```rust
//! use wordpace::ServiceConfig;
//!
//! let cfg = ServiceConfig::from_json(r#"{ "limiter": { "max_requests_per_window": 5 } }"#).unwrap();
//! assert_eq!(cfg.limiter.max_requests_per_window, 5);
//! assert_eq!(cfg.retry.max_retries, 3);
//! ```

use crate::error::ConfigError;
use crate::jitter::Jitter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment overrides read by [`ServiceConfig::from_env`].
pub const ENV_PREFIX: &str = "WORDPACE_";

/// Pacing for the [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Minimum spacing between two dispatches. Zero disables spacing.
    pub min_interval_ms: u64,
    /// Dispatches allowed per window.
    pub max_requests_per_window: u32,
    /// Length of the quota window.
    pub window_duration_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self { min_interval_ms: 1000, max_requests_per_window: 15, window_duration_ms: 60_000 }
    }
}

impl LimiterConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_duration_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_window == 0 {
            return Err(ConfigError::Invalid {
                field: "max_requests_per_window",
                reason: "must be > 0".into(),
            });
        }
        if self.window_duration_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "window_duration_ms",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Retry behaviour for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_delay_ms: 1000, max_delay_ms: 10_000, jitter: Jitter::None }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay_ms == 0 {
            return Err(ConfigError::Invalid { field: "max_delay_ms", reason: "must be > 0".into() });
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "initial_delay_ms",
                reason: format!(
                    "{} exceeds max_delay_ms {}",
                    self.initial_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}

/// Response cache bounds. Both `None` means an unbounded session cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries; least recently used entries are evicted past this.
    pub capacity: Option<usize>,
    /// Entries older than this are treated as absent.
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == Some(0) {
            return Err(ConfigError::Invalid { field: "capacity", reason: "must be > 0".into() });
        }
        Ok(())
    }
}

/// Everything the [`WordInfoService`](crate::WordInfoService) needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub limiter: LimiterConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    /// Bound on a single outbound attempt; expiry counts as a retriable timeout.
    pub request_timeout_ms: Option<u64>,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limiter.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(doc).map_err(|e| ConfigError::Document(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `WORDPACE_*` environment variables, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Apply overrides from an arbitrary lookup (`name` is unprefixed, e.g. `MAX_RETRIES`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "MIN_INTERVAL_MS", &mut self.limiter.min_interval_ms)?;
        override_from(
            &lookup,
            "MAX_REQUESTS_PER_WINDOW",
            &mut self.limiter.max_requests_per_window,
        )?;
        override_from(&lookup, "WINDOW_DURATION_MS", &mut self.limiter.window_duration_ms)?;
        override_from(&lookup, "MAX_RETRIES", &mut self.retry.max_retries)?;
        override_from(&lookup, "INITIAL_DELAY_MS", &mut self.retry.initial_delay_ms)?;
        override_from(&lookup, "MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;

        let mut capacity: OptionalValue<usize> = None;
        override_from(&lookup, "CACHE_CAPACITY", &mut capacity)?;
        if let Some(capacity) = capacity {
            self.cache.capacity = capacity;
        }
        let mut ttl: OptionalValue<u64> = None;
        override_from(&lookup, "CACHE_TTL_SECS", &mut ttl)?;
        if let Some(ttl) = ttl {
            self.cache.ttl_secs = ttl;
        }
        let mut timeout: OptionalValue<u64> = None;
        override_from(&lookup, "REQUEST_TIMEOUT_MS", &mut timeout)?;
        if let Some(timeout) = timeout {
            self.request_timeout_ms = timeout;
        }

        self.validate()?;
        Ok(self)
    }
}

/// Parses `name` into `slot` when the lookup has it; leaves `slot` alone otherwise.
fn override_from<F, T>(lookup: &F, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: OverrideValue,
{
    match lookup(name) {
        Some(raw) => {
            *slot = T::parse_override(raw.trim()).ok_or_else(|| ConfigError::Parse {
                var: format!("{ENV_PREFIX}{name}"),
                value: raw.clone(),
            })?;
            Ok(())
        }
        None => Ok(()),
    }
}

trait OverrideValue: Sized {
    fn parse_override(raw: &str) -> Option<Self>;
}

macro_rules! plain_override {
    ($($t:ty),*) => {
        $(impl OverrideValue for $t {
            fn parse_override(raw: &str) -> Option<Self> {
                <$t as FromStr>::from_str(raw).ok()
            }
        })*
    };
}

plain_override!(u32, u64, usize);

/// An override for an optional setting; `none` (or empty) clears it.
type OptionalValue<T> = Option<Option<T>>;

impl<T: FromStr> OverrideValue for OptionalValue<T> {
    fn parse_override(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return Some(Some(None));
        }
        raw.parse().ok().map(|v| Some(Some(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.initial_delay(), Duration::from_millis(1000));
        assert_eq!(cfg.retry.max_delay(), Duration::from_millis(10_000));
        assert_eq!(cfg.limiter.window_duration(), Duration::from_secs(60));
        assert!(cfg.cache.capacity.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ServiceConfig::from_json(
            r#"{"limiter": {"min_interval_ms": 200}, "cache": {"capacity": 64}, "request_timeout_ms": 5000}"#,
        )
        .unwrap();
        assert_eq!(cfg.limiter.min_interval(), Duration::from_millis(200));
        assert_eq!(cfg.limiter.max_requests_per_window, 15);
        assert_eq!(cfg.cache.capacity, Some(64));
        assert_eq!(cfg.request_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_zero_quota_and_inverted_delays() {
        let err = ServiceConfig::from_json(r#"{"limiter": {"max_requests_per_window": 0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_requests_per_window", .. }));

        let err = ServiceConfig::from_json(
            r#"{"retry": {"initial_delay_ms": 5000, "max_delay_ms": 1000}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "initial_delay_ms", .. }));

        let err = ServiceConfig::from_json(r#"{"limiter": {"window_duration_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "window_duration_ms", .. }));
    }

    #[test]
    fn malformed_document_is_reported() {
        let err = ServiceConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Document(_)));
    }

    #[test]
    fn overrides_apply_and_validate() {
        let cfg = ServiceConfig::default()
            .with_overrides(lookup(&[
                ("MAX_RETRIES", "5"),
                ("MIN_INTERVAL_MS", " 250 "),
                ("CACHE_CAPACITY", "100"),
                ("CACHE_TTL_SECS", "none"),
            ]))
            .unwrap();
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.limiter.min_interval_ms, 250);
        assert_eq!(cfg.cache.capacity, Some(100));
        assert_eq!(cfg.cache.ttl_secs, None);
    }

    #[test]
    fn unparsable_override_names_the_variable() {
        let err = ServiceConfig::default()
            .with_overrides(lookup(&[("WINDOW_DURATION_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse { var: "WORDPACE_WINDOW_DURATION_MS".into(), value: "soon".into() }
        );
    }

    #[test]
    fn invalid_override_fails_validation() {
        let err = ServiceConfig::default()
            .with_overrides(lookup(&[("CACHE_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "capacity", .. }));
    }
}
