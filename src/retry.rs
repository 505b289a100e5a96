//! Retry policy implementation
//!
//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries after the initial attempt, so an operation runs at
//!   most `max_retries + 1` times.
//! - `should_retry` classifies each failure. Fatal failures are returned at once, without
//!   consuming a retry or sleeping.
//! - After the failed attempt with 0-based index `n`, the policy sleeps
//!   `min(initial_delay * 2^n, max_delay)` (then jitter, if configured).
//! - `on_retry(retry_number, &error)` fires before each backoff sleep. It observes only.
//! - When retries run out the last error is returned unchanged.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use wordpace::{FetchError, InstantSleeper, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<FetchError>::builder()
//!     .max_retries(2)
//!     .should_retry(FetchError::is_retriable)
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), FetchError> =
//!     policy.execute(|| async { Err(FetchError::Network("reset".into())) }).await;
//! assert_eq!(result, Err(FetchError::Network("reset".into())));
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::Cancelled;
use crate::{Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type Observer<E> = Arc<dyn Fn(usize, &E) + Send + Sync>;

/// Retry policy combining backoff, jitter, predicate, observer and sleeper.
pub struct RetryPolicy<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    on_retry: Option<Observer<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Builder preloaded from a [`RetryConfig`].
    pub fn from_config(config: &RetryConfig) -> Result<RetryPolicyBuilder<E>, BackoffError> {
        let backoff = Backoff::exponential(config.initial_delay()).with_max(config.max_delay())?;
        Ok(RetryPolicyBuilder::new()
            .max_retries(config.max_retries)
            .backoff(backoff)
            .with_jitter(config.jitter))
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Delay after the failed attempt with 0-based index `attempt`, before jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but stops with `Cancelled` once `token` fires.
    ///
    /// The token is checked before every attempt and raced against each backoff sleep.
    /// An attempt already in flight is not interrupted.
    pub async fn execute_cancellable<T, Fut, Op>(
        &self,
        operation: Op,
        token: &CancelToken,
    ) -> Result<T, E>
    where
        E: From<Cancelled>,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let cancelled: &(dyn Fn() -> E + Send + Sync) = &|| E::from(Cancelled);
        self.run(operation, Some((token, cancelled))).await
    }

    async fn run<T, Fut, Op>(
        &self,
        mut operation: Op,
        cancel: Option<(&CancelToken, &(dyn Fn() -> E + Send + Sync))>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 0usize;
        loop {
            if let Some((token, cancelled)) = cancel {
                if token.is_cancelled() {
                    debug!(attempt, "cancelled before attempt");
                    return Err(cancelled());
                }
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !(self.should_retry)(&err) {
                debug!(attempt, error = %err, "fatal failure, not retrying");
                return Err(err);
            }
            if attempt >= self.max_retries {
                warn!(attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            let retry_number = attempt + 1;
            warn!(retry = retry_number, ?delay, error = %err, "retrying after retriable failure");
            if let Some(observer) = &self.on_retry {
                observer(retry_number, &err);
            }

            match cancel {
                Some((token, cancelled)) => {
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = token.cancelled() => {
                            debug!(retry = retry_number, "cancelled during backoff");
                            return Err(cancelled());
                        }
                    }
                }
                None => self.sleeper.sleep(delay).await,
            }
            attempt += 1;
        }
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Predicate<E>,
    on_retry: Option<Observer<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Defaults: 3 retries, exponential from 1s capped at 10s, no jitter, retry everything.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(1000),
                max: Some(Duration::from_millis(10_000)),
            },
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries after the initial attempt. Zero means a single attempt.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether a failure is worth another attempt.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Observer called with the 1-based retry number and the error before each backoff.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.with_shared_sleeper(Arc::new(sleeper))
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, BackoffError> {
        if let Backoff::Exponential { base, max: Some(max) } = &self.backoff {
            if max < base {
                return Err(BackoffError::MaxLessThanBase { base: *base, max: *max });
            }
        }
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, InstantSleeper, TrackingSleeper};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rate_limited() -> FetchError {
        FetchError::RateLimited { retry_after: None, message: "429".into() }
    }

    fn classified(sleeper: TrackingSleeper) -> RetryPolicy<FetchError> {
        RetryPolicy::builder()
            .should_retry(FetchError::is_retriable)
            .with_sleeper(sleeper)
            .build()
            .expect("builder")
    }

    #[tokio::test]
    async fn success_first_attempt_runs_once() {
        let sleeper = TrackingSleeper::new();
        let policy = classified(sleeper.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = classified(TrackingSleeper::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::Server { status: 503, message: "busy".into() })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_runs_max_retries_plus_one_and_returns_last_error() {
        let sleeper = TrackingSleeper::new();
        let policy = classified(sleeper.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Network(format!("attempt {n}")))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(result, Err(FetchError::Network("attempt 3".into())));
        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[tokio::test]
    async fn fatal_error_short_circuits_without_delay() {
        let sleeper = TrackingSleeper::new();
        let policy = classified(sleeper.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::MalformedResponse("no json".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn delays_cap_at_max_delay() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(6)
            .should_retry(FetchError::is_retriable)
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(rate_limited()) }).await;

        let millis: Vec<u128> = sleeper.calls().iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[tokio::test]
    async fn on_retry_observes_each_retry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .should_retry(FetchError::is_retriable)
            .on_retry(move |n, e: &FetchError| sink.lock().push((n, e.kind())))
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        let _: Result<(), _> = policy.execute(|| async { Err(rate_limited()) }).await;

        let seen = seen.lock();
        let retries: Vec<usize> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(retries, vec![1, 2, 3]);
        assert!(seen.iter().all(|(_, kind)| *kind == crate::ErrorKind::RateLimit));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::builder()
            .max_retries(0)
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Network("down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let policy = classified(TrackingSleeper::new());
        let token = CancelToken::new();
        token.cancel();
        let counter = Arc::new(AtomicUsize::new(0));

        let result: Result<(), _> = policy
            .execute_cancellable(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                &token,
            )
            .await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_returns_immediately() {
        let policy = RetryPolicy::builder()
            .should_retry(FetchError::is_retriable)
            .build()
            .unwrap();
        let token = CancelToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let result: Result<(), _> = policy
            .execute_cancellable(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(rate_limited())
                    }
                },
                &token,
            )
            .await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(1000), "backoff was cut short");
    }

    #[test]
    fn from_config_uses_configured_schedule() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
            jitter: Jitter::None,
        };
        let policy = RetryPolicy::<FetchError>::from_config(&config).unwrap().build().unwrap();
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
    }

    #[test]
    fn build_rejects_inverted_cap() {
        let err = RetryPolicy::<FetchError>::builder()
            .backoff(Backoff::Exponential {
                base: Duration::from_secs(5),
                max: Some(Duration::from_secs(1)),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, BackoffError::MaxLessThanBase { .. }));
    }
}
