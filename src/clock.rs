//! Monotonic time source and periodic tick scheduler.
//!
//! The engine only ever asks "how long has it been" and "wake me up every
//! N seconds" — it never reads wall-clock time. Routing both through a
//! [`Clock`] trait lets tests swap in a [`VirtualClock`] and advance time by
//! hand instead of sleeping for real seconds (needed for the exact 119s/120s
//! sweep boundary tests in the testable-properties list).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A monotonic millisecond time source.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since some fixed (implementation-defined) epoch. Only
    /// differences between two calls are meaningful.
    fn now_ms(&self) -> u64;
}

/// The real system clock, backed by [`std::time::Instant`].
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Move the clock forward to an absolute millisecond value.
    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Spawns a periodic tick loop, cancellable via a
/// [`tokio_util::sync::CancellationToken`].
///
/// This is the one place `tokio::time::interval` appears — every sweep /
/// health-evaluation loop in the crate goes through this helper instead of
/// spawning its own `interval()` call, so the cadence of every periodic task
/// is visible in one place.
pub struct Scheduler {
    shutdown: tokio_util::sync::CancellationToken,
}

impl Scheduler {
    pub fn new(shutdown: tokio_util::sync::CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Runs `tick` every `period`, stopping cleanly when shutdown fires.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!(task = name, "periodic task stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        tick().await;
                    }
                }
            }
        });
    }
}
