//! The admission controller handed to callers.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::backend::{Admission, AdmissionStrategy, Strategy, WindowSnapshot};
use super::clock::{Clock, TokioClock};
use super::fixed::FixedWindowLimiter;
use super::sliding::SlidingWindowLimiter;
use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};

/// Bounds how many operations concurrent callers may start per period.
///
/// The strategy is picked once at construction. One controller is meant to
/// live alongside the client it guards and be closed when that client goes.
pub struct AdmissionController {
    strategy: Box<dyn AdmissionStrategy>,
}

impl AdmissionController {
    /// Create a rolling-window controller.
    pub fn new(limit: u32, period: Duration) -> Result<Self> {
        Self::with_strategy(limit, period, Strategy::SlidingWindow)
    }

    /// Create a controller running the given strategy.
    pub fn with_strategy(limit: u32, period: Duration, strategy: Strategy) -> Result<Self> {
        Self::with_clock(limit, period, strategy, TokioClock)
    }

    /// Create a controller from a validated configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;
        Self::with_strategy(config.limit, config.period(), config.strategy)
    }

    /// Create a controller reading time from `clock`.
    pub fn with_clock(
        limit: u32,
        period: Duration,
        strategy: Strategy,
        clock: impl Clock,
    ) -> Result<Self> {
        let strategy: Box<dyn AdmissionStrategy> = match strategy {
            Strategy::SlidingWindow => {
                Box::new(SlidingWindowLimiter::with_clock(limit, period, clock)?)
            }
            Strategy::FixedWindow => Box::new(FixedWindowLimiter::with_clock(limit, period, clock)?),
        };
        Ok(Self { strategy })
    }

    /// Wrap an already constructed strategy.
    pub fn from_strategy(strategy: impl AdmissionStrategy + 'static) -> Self {
        Self {
            strategy: Box::new(strategy),
        }
    }

    /// Wait for a slot and record the admission.
    ///
    /// Dropping the returned future before it completes gives up the place
    /// in line without consuming a slot.
    pub async fn acquire(&self) -> Result<Admission> {
        self.strategy.acquire().await
    }

    /// Like [`acquire`](Self::acquire), but give up after `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Admission> {
        match tokio::time::timeout(timeout, self.strategy.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Acquire deadline exceeded");
                Err(TollgateError::DeadlineExceeded(timeout))
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but give up once `cancel` resolves.
    pub async fn acquire_until<F>(&self, cancel: F) -> Result<Admission>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            result = self.strategy.acquire() => result,
            _ = cancel => {
                debug!("Acquire cancelled");
                Err(TollgateError::Cancelled)
            }
        }
    }

    /// Admit only if a slot is free right now.
    pub fn try_acquire(&self) -> Result<Admission> {
        self.strategy.try_acquire()
    }

    /// Stop background work and release blocked callers. Safe to call twice.
    pub async fn close(&self) {
        self.strategy.close().await
    }

    /// Whether the controller has been closed.
    pub fn is_closed(&self) -> bool {
        self.strategy.is_closed()
    }

    /// Current window bookkeeping.
    pub fn snapshot(&self) -> WindowSnapshot {
        self.strategy.snapshot()
    }

    /// Configured maximum admissions per period.
    pub fn limit(&self) -> u32 {
        self.strategy.limit()
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.strategy.period()
    }

    /// The strategy in use.
    pub fn strategy(&self) -> Strategy {
        self.strategy.strategy()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("strategy", &self.strategy())
            .field("limit", &self.limit())
            .field("period", &self.period())
            .field("closed", &self.is_closed())
            .finish()
    }
}
