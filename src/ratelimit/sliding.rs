//! Rolling-window admission backed by a bounded queue of grant instants.
//!
//! Every admission pushes its grant instant onto a queue holding at most
//! `limit` entries. A background reclaimer pops entries once they are a full
//! period old, and each pop frees exactly one slot. Capacity is tracked by a
//! fair semaphore, so blocked callers are woken in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::backend::{Admission, AdmissionStrategy, Strategy, WindowSnapshot, WAKE_GUARD};
use super::clock::{Clock, TokioClock};
use super::shutdown::{ShutdownSignal, ShutdownTrigger};
use crate::config::validate_policy;
use crate::error::{Result, TollgateError};

/// Rolling-window limiter: at most `limit` admissions in any trailing period.
pub struct SlidingWindowLimiter {
    inner: Arc<Inner>,
    shutdown: ShutdownTrigger,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the reclaimer task.
struct Inner {
    limit: u32,
    period: Duration,
    clock: Arc<dyn Clock>,
    /// Grant instants of live admissions, oldest first
    admissions: Mutex<VecDeque<Instant>>,
    /// Free slots; always `limit - admissions.len()` outside the critical section
    slots: Semaphore,
}

/// Outcome of one reclaim attempt.
enum Reclaim {
    /// The oldest admission expired and its slot was released
    Freed,
    /// Nothing is outstanding
    Empty,
    /// The oldest admission expires after this long
    NotYet(Duration),
}

impl Inner {
    /// Record an admission for a permit the caller already holds.
    fn record(&self, permit: SemaphorePermit<'_>) -> Admission {
        // The slot now belongs to the queue entry; the reclaimer gives it back.
        permit.forget();

        let mut admissions = self.admissions.lock();
        let granted_at = self.clock.now();
        admissions.push_back(granted_at);
        Admission { granted_at }
    }

    fn reclaim_oldest(&self) -> Reclaim {
        let mut admissions = self.admissions.lock();
        let now = self.clock.now();

        let Some(&granted_at) = admissions.front() else {
            return Reclaim::Empty;
        };

        let age = now.saturating_duration_since(granted_at);
        if age < self.period {
            return Reclaim::NotYet(self.period - age);
        }

        admissions.pop_front();
        self.slots.add_permits(1);
        trace!(
            age_ms = age.as_millis() as u64,
            outstanding = admissions.len(),
            "Reclaimed expired admission"
        );
        Reclaim::Freed
    }

    /// Time until the oldest outstanding admission expires.
    fn retry_after(&self) -> Duration {
        let admissions = self.admissions.lock();
        match admissions.front() {
            Some(&granted_at) => self
                .period
                .saturating_sub(self.clock.now().saturating_duration_since(granted_at)),
            None => self.period,
        }
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter driven by tokio's clock.
    ///
    /// Must be called from within a tokio runtime, which hosts the reclaimer.
    pub fn new(limit: u32, period: Duration) -> Result<Self> {
        Self::with_clock(limit, period, TokioClock)
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(limit: u32, period: Duration, clock: impl Clock) -> Result<Self> {
        validate_policy(limit, period)?;
        let runtime = Handle::try_current().map_err(|e| {
            TollgateError::Config(format!("sliding window limiter needs a tokio runtime: {}", e))
        })?;

        let inner = Arc::new(Inner {
            limit,
            period,
            clock: Arc::new(clock),
            admissions: Mutex::new(VecDeque::with_capacity(limit as usize)),
            slots: Semaphore::new(limit as usize),
        });
        let shutdown = ShutdownTrigger::new();
        let reclaimer = runtime.spawn(reclaim(inner.clone(), shutdown.subscribe()));

        info!(
            limit = limit,
            period_ms = period.as_millis() as u64,
            "Sliding window limiter started"
        );

        Ok(Self {
            inner,
            shutdown,
            reclaimer: Mutex::new(Some(reclaimer)),
        })
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("limit", &self.inner.limit)
            .field("period", &self.inner.period)
            .field("outstanding", &self.inner.admissions.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl AdmissionStrategy for SlidingWindowLimiter {
    async fn acquire(&self) -> Result<Admission> {
        if self.shutdown.is_triggered() {
            return Err(TollgateError::Closed);
        }

        let requested_at = self.inner.clock.now();
        let permit = self
            .inner
            .slots
            .acquire()
            .await
            .map_err(|_| TollgateError::Closed)?;
        let admission = self.inner.record(permit);

        let waited = admission.granted_at.saturating_duration_since(requested_at);
        if !waited.is_zero() {
            debug!(waited_ms = waited.as_millis() as u64, "Admitted after waiting");
        }
        Ok(admission)
    }

    fn try_acquire(&self) -> Result<Admission> {
        match self.inner.slots.try_acquire() {
            Ok(permit) => Ok(self.inner.record(permit)),
            Err(TryAcquireError::Closed) => Err(TollgateError::Closed),
            Err(TryAcquireError::NoPermits) => Err(TollgateError::WouldBlock {
                retry_after: self.inner.retry_after().max(WAKE_GUARD),
            }),
        }
    }

    async fn close(&self) {
        if self.shutdown.trigger() {
            info!("Closing sliding window limiter");
        }
        self.inner.slots.close();

        let reclaimer = self.reclaimer.lock().take();
        if let Some(handle) = reclaimer {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Reclaimer task failed");
                }
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn snapshot(&self) -> WindowSnapshot {
        let used = self.inner.admissions.lock().len() as u32;
        WindowSnapshot {
            limit: self.inner.limit,
            used,
            remaining: self.inner.slots.available_permits() as u32,
            closed: self.is_closed(),
        }
    }

    fn limit(&self) -> u32 {
        self.inner.limit
    }

    fn period(&self) -> Duration {
        self.inner.period
    }

    fn strategy(&self) -> Strategy {
        Strategy::SlidingWindow
    }
}

impl Drop for SlidingWindowLimiter {
    fn drop(&mut self) {
        self.shutdown.trigger();
        self.inner.slots.close();
        if let Some(handle) = self.reclaimer.get_mut().take() {
            handle.abort();
        }
    }
}

/// Retire expired admissions for the lifetime of the limiter.
///
/// Sleeps exactly until the oldest admission expires, or a full period when
/// nothing is outstanding, since nothing pushed later can expire sooner.
async fn reclaim(inner: Arc<Inner>, mut shutdown: ShutdownSignal) {
    debug!("Reclaimer started");

    loop {
        let wait = match inner.reclaim_oldest() {
            Reclaim::Freed => continue,
            Reclaim::Empty => inner.period,
            Reclaim::NotYet(remaining) => remaining.saturating_add(WAKE_GUARD),
        };

        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    debug!("Reclaimer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, task};

    const PERIOD: Duration = Duration::from_millis(100);

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let err = SlidingWindowLimiter::new(1, PERIOD).err().unwrap();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_rejects_invalid_policy() {
        assert!(SlidingWindowLimiter::new(0, PERIOD).is_err());
        assert!(SlidingWindowLimiter::new(1, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_two_third_caller_waits_one_period() {
        let limiter = SlidingWindowLimiter::new(2, PERIOD).unwrap();
        let start = Instant::now();

        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert_eq!(first.granted_at, start);
        assert_eq!(second.granted_at, start);

        let third = limiter.acquire().await.unwrap();
        let waited = third.granted_at - first.granted_at;
        assert!(waited >= PERIOD, "third admitted after {:?}", waited);
        assert!(waited < PERIOD + Duration::from_millis(10));

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_limit_plus_one_grants_span_a_full_period() {
        let limit = 3;
        let limiter = Arc::new(SlidingWindowLimiter::new(limit, PERIOD).unwrap());

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await.unwrap().granted_at })
            })
            .collect();

        let mut grants: Vec<Instant> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        grants.sort();

        for span in grants.windows(limit as usize + 1) {
            let elapsed = span[limit as usize] - span[0];
            assert!(elapsed >= PERIOD, "{} grants within {:?}", limit + 1, elapsed);
        }

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_callers_block_until_slots_expire() {
        let limiter = Arc::new(SlidingWindowLimiter::new(2, PERIOD).unwrap());
        let admitted = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            tokio::spawn(async move {
                limiter.acquire().await.unwrap();
                admitted.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.snapshot().remaining, 0);

        // Both initial grants expire together one period in.
        tokio::time::sleep(PERIOD).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 4);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 5);

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_admitted_in_arrival_order() {
        let limiter = Arc::new(SlidingWindowLimiter::new(1, PERIOD).unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|id| {
                let limiter = limiter.clone();
                let order = order.clone();
                tokio::spawn(async move {
                    limiter.acquire().await.unwrap();
                    order.lock().push(id);
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_retry_after() {
        let limiter = SlidingWindowLimiter::new(1, PERIOD).unwrap();
        limiter.try_acquire().unwrap();

        tokio::time::advance(Duration::from_millis(30)).await;

        match limiter.try_acquire() {
            Err(TollgateError::WouldBlock { retry_after }) => {
                assert_eq!(retry_after, Duration::from_millis(70));
            }
            other => panic!("expected WouldBlock, got {:?}", other),
        }
        assert_eq!(limiter.snapshot().used, 1);

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_never_expires() {
        let limiter = SlidingWindowLimiter::new(1, Duration::MAX).unwrap();
        limiter.try_acquire().unwrap();

        // Let the reclaimer see the admission and go to sleep on it.
        tokio::task::yield_now().await;

        match limiter.try_acquire() {
            Err(TollgateError::WouldBlock { retry_after }) => {
                assert!(retry_after > Duration::from_secs(86400 * 365));
            }
            other => panic!("expected WouldBlock, got {:?}", other),
        }
        assert_eq!(limiter.snapshot().used, 1);

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquire_consumes_no_slot() {
        let limiter = SlidingWindowLimiter::new(1, PERIOD).unwrap();
        let first = limiter.acquire().await.unwrap();

        {
            let mut waiting = task::spawn(limiter.acquire());
            assert_pending!(waiting.poll());
        }
        assert_eq!(limiter.snapshot().used, 1);

        let next = limiter.acquire().await.unwrap();
        assert!(next.granted_at - first.granted_at >= PERIOD);
        assert_eq!(limiter.snapshot().used, 1);

        limiter.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_blocked_callers() {
        let limiter = Arc::new(SlidingWindowLimiter::new(1, Duration::from_secs(60)).unwrap());
        limiter.acquire().await.unwrap();

        let blocked: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        limiter.close().await;
        for handle in blocked {
            assert!(matches!(handle.await.unwrap(), Err(TollgateError::Closed)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_joins_reclaimer() {
        let limiter = SlidingWindowLimiter::new(2, PERIOD).unwrap();
        limiter.acquire().await.unwrap();

        limiter.close().await;
        let after_first = limiter.snapshot();
        limiter.close().await;

        assert_eq!(limiter.snapshot(), after_first);
        assert!(limiter.is_closed());
        assert!(limiter.reclaimer.lock().is_none());

        assert!(matches!(limiter.acquire().await, Err(TollgateError::Closed)));
        assert!(matches!(limiter.try_acquire(), Err(TollgateError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_clock_drives_expiry() {
        let clock = ManualClock::new();
        let limiter =
            Arc::new(SlidingWindowLimiter::with_clock(1, Duration::from_secs(1), clock.clone()).unwrap());
        limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        clock.advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let admission = waiter.await.unwrap().unwrap();
        assert_eq!(admission.granted_at, clock.now());
        limiter.close().await;
    }
}
