//! Fixed-window admission counter.
//!
//! Windows do not overlap and are not aligned to the wall clock: a window
//! opens with the first admission after the previous one expired. Up to
//! `2 * limit` admissions can therefore land within a short span straddling
//! a window boundary. Use [`SlidingWindowLimiter`](super::SlidingWindowLimiter)
//! when every trailing period must stay under the limit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::backend::{Admission, AdmissionStrategy, Strategy, WindowSnapshot, WAKE_GUARD};
use super::clock::{Clock, TokioClock};
use super::shutdown::ShutdownTrigger;
use crate::config::validate_policy;
use crate::error::{Result, TollgateError};

/// Fixed-window limiter with inline reclamation and no background task.
pub struct FixedWindowLimiter {
    limit: u32,
    period: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
    /// Fair queue of waiters; only its holder competes for the window
    turnstile: tokio::sync::Mutex<()>,
    shutdown: ShutdownTrigger,
}

/// Admissions counted in the current window.
#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

impl WindowState {
    /// Admit at `now`, or report how long until the window rolls over.
    ///
    /// Works on elapsed time so that huge periods never overflow an instant.
    fn admit(
        &mut self,
        now: Instant,
        limit: u32,
        period: Duration,
    ) -> std::result::Result<Instant, Duration> {
        let elapsed = now.saturating_duration_since(self.window_start);

        if elapsed >= period {
            self.window_start = now;
            self.count = 1;
            return Ok(now);
        }

        if self.count < limit {
            self.count += 1;
            return Ok(now);
        }

        Err(period - elapsed)
    }

    /// Admissions that still count against the limit at `now`.
    fn used(&self, now: Instant, period: Duration) -> u32 {
        if now.saturating_duration_since(self.window_start) >= period {
            0
        } else {
            self.count
        }
    }

    fn duration_until_reset(&self, now: Instant, period: Duration) -> Duration {
        period.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

impl FixedWindowLimiter {
    /// Create a limiter driven by tokio's clock.
    pub fn new(limit: u32, period: Duration) -> Result<Self> {
        Self::with_clock(limit, period, TokioClock)
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(limit: u32, period: Duration, clock: impl Clock) -> Result<Self> {
        validate_policy(limit, period)?;

        let window_start = clock.now();
        info!(
            limit = limit,
            period_ms = period.as_millis() as u64,
            "Fixed window limiter started"
        );

        Ok(Self {
            limit,
            period,
            clock: Arc::new(clock),
            state: Mutex::new(WindowState {
                window_start,
                count: 0,
            }),
            turnstile: tokio::sync::Mutex::new(()),
            shutdown: ShutdownTrigger::new(),
        })
    }

    fn attempt(&self) -> std::result::Result<Admission, Duration> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state
            .admit(now, self.limit, self.period)
            .map(|granted_at| Admission { granted_at })
    }
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("state", &*self.state.lock())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl AdmissionStrategy for FixedWindowLimiter {
    async fn acquire(&self) -> Result<Admission> {
        if self.shutdown.is_triggered() {
            return Err(TollgateError::Closed);
        }

        let mut shutdown = self.shutdown.subscribe();
        let requested_at = self.clock.now();

        let _turn = tokio::select! {
            biased;
            _ = shutdown.wait() => return Err(TollgateError::Closed),
            turn = self.turnstile.lock() => turn,
        };

        loop {
            let wait = match self.attempt() {
                Ok(admission) => {
                    let waited = admission.granted_at.saturating_duration_since(requested_at);
                    if !waited.is_zero() {
                        debug!(waited_ms = waited.as_millis() as u64, "Admitted after waiting");
                    }
                    return Ok(admission);
                }
                Err(wait) => wait,
            };

            trace!(wait_ms = wait.as_millis() as u64, "Window full, waiting for rollover");

            // The state lock is not held here; the next attempt rechecks from scratch.
            tokio::select! {
                biased;
                _ = shutdown.wait() => return Err(TollgateError::Closed),
                _ = tokio::time::sleep(wait.saturating_add(WAKE_GUARD)) => {}
            }
        }
    }

    fn try_acquire(&self) -> Result<Admission> {
        if self.shutdown.is_triggered() {
            return Err(TollgateError::Closed);
        }

        // Someone is already queued or waiting; never jump ahead of them,
        // even if the window has just rolled over and they have yet to wake.
        let Ok(_turn) = self.turnstile.try_lock() else {
            let retry_after = self
                .state
                .lock()
                .duration_until_reset(self.clock.now(), self.period)
                .max(WAKE_GUARD);
            return Err(TollgateError::WouldBlock { retry_after });
        };

        self.attempt()
            .map_err(|retry_after| TollgateError::WouldBlock { retry_after })
    }

    async fn close(&self) {
        if self.shutdown.trigger() {
            info!("Closing fixed window limiter");
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn snapshot(&self) -> WindowSnapshot {
        let used = self.state.lock().used(self.clock.now(), self.period);
        WindowSnapshot {
            limit: self.limit,
            used,
            remaining: self.limit - used,
            closed: self.is_closed(),
        }
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn strategy(&self) -> Strategy {
        Strategy::FixedWindow
    }
}
