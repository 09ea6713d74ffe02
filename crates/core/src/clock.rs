//! Injectable time source.
//!
//! Wall-clock time drives working hours and pause expiry; the monotonic
//! reading drives rate-limit buckets and retry backoff. Both go through one
//! trait so tests can advance time without sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source shared by the API client, the resolver and the scheduler.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic time elapsed since the clock was created.
    fn monotonic(&self) -> Duration;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the system time and the tokio timer.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[derive(Debug)]
struct ManualState {
    wall: DateTime<Utc>,
    monotonic: Duration,
    slept: Vec<Duration>,
}

/// Hand-driven clock for tests. `sleep` returns immediately and advances
/// both readings by the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                wall: start,
                monotonic: Duration::ZERO,
                slept: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.monotonic += duration;
        state.wall += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Jump the wall clock to `at`; the monotonic reading moves by the same amount when forward.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        if let Ok(forward) = (at - state.wall).to_std() {
            state.monotonic += forward;
        }
        state.wall = at;
    }

    /// Every duration passed to `sleep` so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().slept.clone()
    }

    /// Total time spent in `sleep`.
    pub fn total_slept(&self) -> Duration {
        self.lock().slept.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().wall
    }

    fn monotonic(&self) -> Duration {
        self.lock().monotonic
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            state.slept.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
