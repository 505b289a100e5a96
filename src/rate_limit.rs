//! Rate limiting primitives.
//!
//! [`RateLimiter`] is a single-flight FIFO queue. Submitted tasks run one at a
//! time, in submission order, and only when both the window quota and the
//! minimum spacing allow it:
//! - at most `max_requests_per_window` dispatches per `window_duration_ms`;
//! - at least `min_interval_ms` between consecutive dispatches.
//!
//! # Architecture
//!
//! - **Queue**: `submit` pushes a [`QueuedTask`] and hands back a [`Pending`]
//!   future wired to the task's outcome. The first submission on an idle
//!   limiter spawns a drain task on the Tokio runtime; the drain task exits
//!   once the queue is empty.
//! - **Window**: [`window::RateWindowState`] decides when the head may go.
//! - **Middleware**: [`RateLimitLayer`] puts any `tower::Service` behind a
//!   shared limiter.
//!
//! Clones of a `RateLimiter` share one queue and one quota. Build it once and
//! hand clones to every caller that draws on the same provider quota.

use crate::cancel::CancelToken;
use crate::clock::{Clock, MonotonicClock};
use crate::config::LimiterConfig;
use crate::error::{ConfigError, LimiterError};
use crate::sleeper::{Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use pin_project::pin_project;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

pub mod middleware;
pub mod window;

pub use middleware::{RateLimitLayer, RateLimitService};
use window::{Admission, RateWindowState};

/// Point-in-time view of a limiter, for UI polling and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    /// Dispatches left in the current window.
    pub remaining_requests: u32,
    /// Seconds until the current window ends, rounded up.
    pub reset_in_seconds: u64,
    /// Tasks waiting to be dispatched.
    pub queue_length: usize,
    /// Whether a drain task is active.
    pub is_draining: bool,
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A deferred unit of work waiting for its dispatch slot.
pub struct QueuedTask {
    id: u64,
    enqueued_at: u64,
    cancel: Option<CancelToken>,
    dispatched: Arc<AtomicBool>,
    job: Job,
}

impl QueuedTask {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("enqueued_at", &self.enqueued_at)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

struct Shared {
    queue: VecDeque<QueuedTask>,
    window: RateWindowState,
    draining: bool,
}

struct Inner {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    shared: Mutex<Shared>,
    next_id: AtomicU64,
}

enum Step {
    Dispatch(QueuedTask),
    Wait(Duration),
    Idle,
}

impl Inner {
    /// Decide what the drain loop does next. Holds the lock for the whole
    /// check-then-mutate sequence and never across an await.
    fn next_step(&self) -> Step {
        let mut shared = self.shared.lock();

        let queued = shared.queue.len();
        shared.queue.retain(|task| !task.is_cancelled());
        let discarded = queued - shared.queue.len();
        if discarded > 0 {
            debug!(discarded, "dropped cancelled tasks before dispatch");
        }

        if shared.queue.is_empty() {
            shared.draining = false;
            debug!("queue empty, limiter idle");
            return Step::Idle;
        }

        let now = self.clock.now_millis();
        if let Admission::Wait(delay) = shared.window.admit(now, &self.config) {
            return Step::Wait(delay);
        }

        match shared.queue.pop_front() {
            Some(task) => {
                shared.window.record_dispatch(now);
                task.dispatched.store(true, Ordering::SeqCst);
                debug!(
                    task_id = task.id,
                    queued_ms = now.saturating_sub(task.enqueued_at),
                    window_count = shared.window.request_count(),
                    remaining = shared.queue.len(),
                    "dispatching task"
                );
                Step::Dispatch(task)
            }
            None => {
                shared.draining = false;
                Step::Idle
            }
        }
    }

    async fn drain(self: Arc<Self>) {
        let mut guard = DrainGuard { inner: &*self, finished: false };
        loop {
            match self.next_step() {
                Step::Idle => {
                    guard.finished = true;
                    return;
                }
                Step::Wait(delay) => {
                    trace!(?delay, "pacing");
                    self.sleeper.sleep(delay).await;
                }
                Step::Dispatch(task) => (task.job)().await,
            }
        }
    }
}

/// Clears `draining` if the drain task is dropped before it goes idle, e.g.
/// when its runtime shuts down, so the next submission spawns a fresh one.
struct DrainGuard<'a> {
    inner: &'a Inner,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("drain task dropped mid-drain; limiter reset to idle");
            self.inner.shared.lock().draining = false;
        }
    }
}

/// Shared, paced, single-flight task queue.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl RateLimiter {
    /// Limiter on the Tokio clock.
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: LimiterConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    /// Enqueue `operation` now and return a future for its outcome.
    ///
    /// FIFO order is the order of `submit` calls. Must be called from within a
    /// Tokio runtime, since an idle limiter spawns its drain task here.
    pub fn submit<T, E, Op, Fut>(&self, operation: Op) -> Pending<T, E>
    where
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.enqueue(operation, None)
    }

    /// Enqueue `operation` and wait for its outcome.
    pub async fn execute<T, E, Op, Fut>(&self, operation: Op) -> Result<T, LimiterError<E>>
    where
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit(operation).await
    }

    /// Like [`execute`](Self::execute), but resolves to `Cancelled` as soon as
    /// `token` fires while the task is still queued. A cancelled task is
    /// discarded without consuming quota. Once dispatched, the token no longer
    /// applies here: the operation runs to completion and its outcome is
    /// returned. Pass the token into the operation to stop it cooperatively.
    pub async fn execute_cancellable<T, E, Op, Fut>(
        &self,
        operation: Op,
        token: &CancelToken,
    ) -> Result<T, LimiterError<E>>
    where
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if token.is_cancelled() {
            return Err(LimiterError::Cancelled);
        }
        let mut pending = self.enqueue(operation, Some(token.clone()));
        tokio::select! {
            biased;
            outcome = &mut pending => return outcome,
            _ = token.cancelled() => {}
        }

        // Dispatch happens under the queue lock after a cancellation check, so
        // a task seen as undispatched here will be discarded by the drain loop.
        let queued = {
            let _shared = self.inner.shared.lock();
            !pending.is_dispatched()
        };
        if queued {
            debug!("task cancelled while queued");
            return Err(LimiterError::Cancelled);
        }
        trace!("token fired after dispatch, awaiting outcome");
        pending.await
    }

    /// Snapshot for polling. Never blocks on the queue.
    pub fn status(&self) -> LimiterStatus {
        let now = self.inner.clock.now_millis();
        let shared = self.inner.shared.lock();
        let reset_in = shared.window.reset_in(now, &self.inner.config);
        LimiterStatus {
            remaining_requests: shared.window.remaining(now, &self.inner.config),
            reset_in_seconds: ((reset_in.as_millis() + 999) / 1000) as u64,
            queue_length: shared.queue.len(),
            is_draining: shared.draining,
        }
    }

    fn enqueue<T, E, Op, Fut>(&self, operation: Op, cancel: Option<CancelToken>) -> Pending<T, E>
    where
        Op: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let dispatched = Arc::new(AtomicBool::new(false));
        let job: Job = Box::new(move || {
            async move {
                match AssertUnwindSafe(async move { operation().await }).catch_unwind().await {
                    Ok(outcome) => {
                        // The caller may have stopped waiting; that is fine.
                        let _ = tx.send(outcome);
                    }
                    Err(_) => warn!(task_id = id, "task panicked; caller sees the limiter as closed"),
                }
            }
            .boxed()
        });

        let task = QueuedTask {
            id,
            enqueued_at: self.inner.clock.now_millis(),
            cancel: cancel.clone(),
            dispatched: Arc::clone(&dispatched),
            job,
        };

        let start_drain = {
            let mut shared = self.inner.shared.lock();
            shared.queue.push_back(task);
            trace!(task_id = id, queue_length = shared.queue.len(), "task queued");
            !std::mem::replace(&mut shared.draining, true)
        };
        if start_drain {
            debug!("limiter draining");
            tokio::spawn(Arc::clone(&self.inner).drain());
        }

        Pending { rx, cancel, dispatched }
    }
}

/// Builder for [`RateLimiter`], mainly to inject a clock and sleeper in tests.
pub struct RateLimiterBuilder {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiterBuilder {
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RateLimiter, ConfigError> {
        self.config.validate()?;
        let now = self.clock.now_millis();
        Ok(RateLimiter {
            inner: Arc::new(Inner {
                config: self.config,
                clock: self.clock,
                sleeper: self.sleeper,
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    window: RateWindowState::new(now),
                    draining: false,
                }),
                next_id: AtomicU64::new(0),
            }),
        })
    }
}

/// Outcome of a submitted task, resolved once the task has run.
#[pin_project]
#[must_use = "the task runs regardless, but its outcome is only observed by awaiting"]
pub struct Pending<T, E> {
    #[pin]
    rx: oneshot::Receiver<Result<T, E>>,
    cancel: Option<CancelToken>,
    dispatched: Arc<AtomicBool>,
}

impl<T, E> Pending<T, E> {
    /// Whether the limiter has handed the task its dispatch slot.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched.load(Ordering::SeqCst)
    }
}

impl<T, E> Future for Pending<T, E> {
    type Output = Result<T, LimiterError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let outcome = match ready!(this.rx.poll(cx)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LimiterError::Task(e)),
            Err(_)
                if !this.dispatched.load(Ordering::SeqCst)
                    && this.cancel.as_ref().is_some_and(CancelToken::is_cancelled) =>
            {
                Err(LimiterError::Cancelled)
            }
            Err(_) => Err(LimiterError::Closed),
        };
        Poll::Ready(outcome)
    }
}
