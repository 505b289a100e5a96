//! Fixed-window quota and minimum-spacing bookkeeping.
//!
//! Pure arithmetic over clock readings in milliseconds; the limiter owns one
//! [`RateWindowState`] behind its lock and asks it whether the head of the
//! queue may go now.

use crate::config::LimiterConfig;
use std::time::Duration;

/// Result of asking the window whether a dispatch may happen at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    /// Re-evaluate after this long.
    Wait(Duration),
}

/// Dispatch accounting for the current quota window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowState {
    window_start: u64,
    request_count: u32,
    last_dispatch: Option<u64>,
}

impl RateWindowState {
    pub fn new(now: u64) -> Self {
        Self { window_start: now, request_count: 0, last_dispatch: None }
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn last_dispatch(&self) -> Option<u64> {
        self.last_dispatch
    }

    /// Roll the window if it has elapsed, then check quota and spacing.
    pub fn admit(&mut self, now: u64, config: &LimiterConfig) -> Admission {
        let elapsed = now.saturating_sub(self.window_start);
        if elapsed >= config.window_duration_ms {
            self.window_start = now;
            self.request_count = 0;
        }

        if self.request_count >= config.max_requests_per_window {
            let wait = config.window_duration_ms - now.saturating_sub(self.window_start);
            return Admission::Wait(Duration::from_millis(wait));
        }

        if let Some(last) = self.last_dispatch {
            let since = now.saturating_sub(last);
            if since < config.min_interval_ms {
                return Admission::Wait(Duration::from_millis(config.min_interval_ms - since));
            }
        }

        Admission::Ready
    }

    pub fn record_dispatch(&mut self, now: u64) {
        self.last_dispatch = Some(now);
        self.request_count = self.request_count.saturating_add(1);
    }

    /// Dispatches still allowed, counting an elapsed window as already reset.
    pub fn remaining(&self, now: u64, config: &LimiterConfig) -> u32 {
        if self.is_stale(now, config) {
            return config.max_requests_per_window;
        }
        config.max_requests_per_window.saturating_sub(self.request_count)
    }

    /// Time until the current window ends; zero once it has.
    pub fn reset_in(&self, now: u64, config: &LimiterConfig) -> Duration {
        let elapsed = now.saturating_sub(self.window_start);
        Duration::from_millis(config.window_duration_ms.saturating_sub(elapsed))
    }

    fn is_stale(&self, now: u64, config: &LimiterConfig) -> bool {
        now.saturating_sub(self.window_start) >= config.window_duration_ms
    }
}
