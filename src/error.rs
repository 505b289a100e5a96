//! Error types for fetching word information
use std::time::Duration;

/// Broad classes of [`FetchError`], used by presentation layers to pick messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential or configuration missing or invalid.
    Configuration,
    /// The provider throttled the request.
    RateLimit,
    /// Connection failure, timeout, or 5xx.
    TransientNetwork,
    /// The provider answered with something that is not word information.
    MalformedResponse,
    /// The caller cancelled the request.
    Cancelled,
    /// Anything else.
    Fatal,
}

/// Failure of a word-information request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("word service not configured: {0}")]
    Configuration(String),
    #[error("rate limited by provider: {message}")]
    RateLimited { retry_after: Option<Duration>, message: String },
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    /// Map an HTTP status and body from the provider onto an error.
    ///
    /// 429 is a rate limit, 408 and 5xx are server errors that keep the
    /// status and body, 401/403 a credential problem. Everything else is fatal.
    /// [`FetchError::Timeout`] is reserved for the client-side attempt deadline.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => FetchError::RateLimited { retry_after: None, message },
            408 | 500..=599 => FetchError::Server { status, message },
            401 | 403 => FetchError::Configuration(message),
            _ => FetchError::Fatal(format!("provider returned {status}: {message}")),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Configuration(_) => ErrorKind::Configuration,
            FetchError::RateLimited { .. } => ErrorKind::RateLimit,
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::Server { .. } => {
                ErrorKind::TransientNetwork
            }
            FetchError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            FetchError::Cancelled => ErrorKind::Cancelled,
            FetchError::InvalidInput(_) | FetchError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Rate limits and transient network failures are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::TransientNetwork)
    }

    /// Suggested wait before trying again, if this is a rate limit with a hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Marker error produced when a [`CancelToken`](crate::CancelToken) fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}

/// Outcome of a task submitted to the [`RateLimiter`](crate::RateLimiter) that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError<E> {
    /// The task ran and failed.
    #[error("{0}")]
    Task(E),
    /// The task was cancelled before it was dispatched.
    #[error("task cancelled before dispatch")]
    Cancelled,
    /// The task was dropped without settling (runtime shut down or the task panicked).
    #[error("rate limiter dropped the task before it settled")]
    Closed,
}

impl<E> LimiterError<E> {
    /// Borrow the task's own error, if it ran and failed.
    pub fn as_task(&self) -> Option<&E> {
        match self {
            LimiterError::Task(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LimiterError::Cancelled)
    }
}

impl From<LimiterError<FetchError>> for FetchError {
    fn from(err: LimiterError<FetchError>) -> Self {
        match err {
            LimiterError::Task(e) => e,
            LimiterError::Cancelled => FetchError::Cancelled,
            LimiterError::Closed => FetchError::Fatal("rate limiter dropped the request".into()),
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("cannot parse {var}={value:?}")]
    Parse { var: String, value: String },
    #[error("malformed config document: {0}")]
    Document(String),
}

impl From<ConfigError> for FetchError {
    fn from(err: ConfigError) -> Self {
        FetchError::Configuration(err.to_string())
    }
}
