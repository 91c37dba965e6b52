//! Admission strategy trait shared by the sliding and fixed window limiters.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;

/// Guard added to every computed wait so a sleeper never wakes a tick early.
pub(crate) const WAKE_GUARD: Duration = Duration::from_millis(1);

/// Which admission strategy a controller runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Rolling window: at most N admissions in any trailing period
    #[default]
    SlidingWindow,
    /// Fixed windows restarted by the first admission after expiry
    FixedWindow,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SlidingWindow => write!(f, "sliding_window"),
            Strategy::FixedWindow => write!(f, "fixed_window"),
        }
    }
}

/// One granted slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// When the slot was recorded in the window state
    pub granted_at: Instant,
}

/// Point-in-time view of a limiter's window state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Configured maximum admissions per period
    pub limit: u32,
    /// Admissions currently counted against the window
    pub used: u32,
    /// Slots that could be granted right now without waiting
    pub remaining: u32,
    /// Whether the limiter has been closed
    pub closed: bool,
}

/// Trait for admission strategy implementations.
///
/// Both strategies serialize every state change through a single mutex and
/// never hold it across an `.await`. Dropping an `acquire` future is always
/// safe: no slot is consumed unless the future returns `Ok`.
#[async_trait]
pub trait AdmissionStrategy: Send + Sync {
    /// Wait until a slot is free, then record the admission.
    async fn acquire(&self) -> Result<Admission>;

    /// Record an admission only if a slot is free right now and nobody is
    /// already waiting for one.
    ///
    /// Fails with `WouldBlock` otherwise; its `retry_after` is never zero.
    fn try_acquire(&self) -> Result<Admission>;

    /// Stop background work and release every blocked caller with `Closed`.
    async fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;

    /// Current window bookkeeping.
    fn snapshot(&self) -> WindowSnapshot;

    /// Configured maximum admissions per period.
    fn limit(&self) -> u32;

    /// Configured period.
    fn period(&self) -> Duration;

    /// Which strategy this is.
    fn strategy(&self) -> Strategy;
}
