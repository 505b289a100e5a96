//! Cached, paced, retrying access to a [`WordSource`].
//!
//! A request for a word goes through three layers in order:
//!
//! 1. the [`ResponseCache`], keyed by [`cache_key`]. A hit returns at once and
//!    never touches the limiter or the provider;
//! 2. the shared [`RateLimiter`], which queues the miss behind every other
//!    request drawing on the same quota;
//! 3. the [`RetryPolicy`], which runs the outbound call and backs off on rate
//!    limits and transient network failures.
//!
//! Only a decoded, validated [`WordInfo`] is ever cached.

use crate::backoff::BackoffError;
use crate::cache::ResponseCache;
use crate::cancel::CancelToken;
use crate::config::{CacheConfig, ServiceConfig};
use crate::error::{ConfigError, FetchError};
use crate::rate_limit::{LimiterStatus, RateLimiter};
use crate::retry::RetryPolicy;
use crate::sleeper::Sleeper;
use crate::word_info::{cache_key, WordInfo, WordSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

type RetryObserver = Arc<dyn Fn(usize, &FetchError) + Send + Sync>;

/// Word information service for one provider.
pub struct WordInfoService<S> {
    source: Arc<S>,
    cache: Arc<ResponseCache<WordInfo>>,
    limiter: RateLimiter,
    retry: RetryPolicy<FetchError>,
    request_timeout: Option<Duration>,
    rate_limit_hint: Duration,
}

impl<S> std::fmt::Debug for WordInfoService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordInfoService")
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: WordSource> WordInfoService<S> {
    /// Service with default configuration and its own limiter.
    pub fn new(source: S) -> Result<Self, ConfigError> {
        Self::builder(source).build()
    }

    pub fn builder(source: S) -> WordInfoServiceBuilder<S> {
        WordInfoServiceBuilder {
            source,
            config: ServiceConfig::default(),
            limiter: None,
            cache: None,
            retry_sleeper: None,
            on_retry: None,
        }
    }

    /// Word information for `word` in `language`, from cache when possible.
    ///
    /// `word` is the raw user input; it is trimmed and lowercased for the
    /// cache lookup and trimmed for the outbound call.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_word_info(&self, word: &str, language: &str) -> Result<WordInfo, FetchError> {
        self.fetch(word, language, None).await
    }

    /// Like [`fetch_word_info`](Self::fetch_word_info), but gives up with
    /// [`FetchError::Cancelled`] once `token` fires: while queued, between
    /// attempts, or during a backoff sleep. An attempt already talking to the
    /// provider is not interrupted; if it succeeds, its result is cached and
    /// returned.
    #[instrument(level = "debug", skip(self, token))]
    pub async fn fetch_word_info_cancellable(
        &self,
        word: &str,
        language: &str,
        token: &CancelToken,
    ) -> Result<WordInfo, FetchError> {
        self.fetch(word, language, Some(token)).await
    }

    /// Snapshot of the shared limiter.
    pub fn status(&self) -> LimiterStatus {
        self.limiter.status()
    }

    pub fn cache(&self) -> &ResponseCache<WordInfo> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn fetch(
        &self,
        word: &str,
        language: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<WordInfo, FetchError> {
        let key = cache_key(word);
        if key.is_empty() {
            return Err(FetchError::InvalidInput("word is empty".into()));
        }

        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "cache hit");
            return Ok(hit);
        }
        debug!(%key, "cache miss, queueing request");

        let op = self.outbound(word.trim().to_owned(), language.to_owned(), cancel.cloned());
        let outcome = match cancel {
            Some(token) => self.limiter.execute_cancellable(op, token).await,
            None => self.limiter.execute(op).await,
        };

        match outcome.map_err(FetchError::from) {
            Ok(info) => {
                self.cache.set(key, info.clone());
                Ok(info)
            }
            Err(err) => Err(self.with_rate_limit_hint(err)),
        }
    }

    /// The deferred, retry-wrapped provider call handed to the limiter.
    fn outbound(
        &self,
        word: String,
        language: String,
        cancel: Option<CancelToken>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<WordInfo, FetchError>> + Send + 'static {
        let source = Arc::clone(&self.source);
        let retry = self.retry.clone();
        let timeout = self.request_timeout;
        move || {
            async move {
                let attempt = || fetch_once(source.as_ref(), &word, &language, timeout);
                match &cancel {
                    Some(token) => retry.execute_cancellable(attempt, token).await,
                    None => retry.execute(attempt).await,
                }
            }
            .boxed()
        }
    }

    fn with_rate_limit_hint(&self, err: FetchError) -> FetchError {
        match err {
            FetchError::RateLimited { retry_after: None, message } => {
                warn!(hint = ?self.rate_limit_hint, "rate limit persisted through retries");
                FetchError::RateLimited { retry_after: Some(self.rate_limit_hint), message }
            }
            other => other,
        }
    }
}

/// One provider attempt: fetch, bound by `timeout`, then decode.
async fn fetch_once<S: WordSource + ?Sized>(
    source: &S,
    word: &str,
    language: &str,
    timeout: Option<Duration>,
) -> Result<WordInfo, FetchError> {
    let raw = match timeout {
        Some(limit) => match tokio::time::timeout(limit, source.fetch(word, language)).await {
            Ok(raw) => raw?,
            Err(_) => return Err(FetchError::Timeout(limit)),
        },
        None => source.fetch(word, language).await?,
    };
    WordInfo::from_raw(raw)
}

/// Builder for [`WordInfoService`].
pub struct WordInfoServiceBuilder<S> {
    source: S,
    config: ServiceConfig,
    limiter: Option<RateLimiter>,
    cache: Option<Arc<ResponseCache<WordInfo>>>,
    retry_sleeper: Option<Arc<dyn Sleeper>>,
    on_retry: Option<RetryObserver>,
}

impl<S: WordSource> WordInfoServiceBuilder<S> {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing limiter. Its own configuration wins over `config.limiter`.
    pub fn limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Use an existing cache instead of one built from `config.cache`.
    pub fn cache(mut self, cache: Arc<ResponseCache<WordInfo>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sleeper for retry backoff.
    pub fn retry_sleeper<Z: Sleeper + 'static>(mut self, sleeper: Z) -> Self {
        self.retry_sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Observer for retries (1-based retry number and the failure).
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &FetchError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> Result<WordInfoService<S>, ConfigError> {
        self.config.validate()?;

        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => RateLimiter::new(self.config.limiter.clone())?,
        };
        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(cache_from_config(&self.config.cache)),
        };

        let invalid_retry =
            |e: BackoffError| ConfigError::Invalid { field: "retry", reason: e.to_string() };
        let mut retry = RetryPolicy::from_config(&self.config.retry)
            .map_err(invalid_retry)?
            .should_retry(FetchError::is_retriable);
        if let Some(sleeper) = self.retry_sleeper {
            retry = retry.with_shared_sleeper(sleeper);
        }
        if let Some(observer) = self.on_retry {
            retry = retry.on_retry(move |n, err| observer(n, err));
        }
        let retry = retry.build().map_err(invalid_retry)?;

        Ok(WordInfoService {
            source: Arc::new(self.source),
            cache,
            limiter,
            retry,
            request_timeout: self.config.request_timeout(),
            rate_limit_hint: self.config.retry.max_delay(),
        })
    }
}

fn cache_from_config(config: &CacheConfig) -> ResponseCache<WordInfo> {
    let cache = match config.capacity.and_then(NonZeroUsize::new) {
        Some(capacity) => ResponseCache::with_capacity(capacity),
        None => ResponseCache::new(),
    };
    match config.ttl() {
        Some(ttl) => cache.with_ttl(ttl),
        None => cache,
    }
}
