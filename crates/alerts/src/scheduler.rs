//! Job registry: at most one recurring timer per (tenant, kind).
//!
//! Each job is a spawned task driven by `tokio::time::interval`. The first
//! tick fires immediately. A tick runs to completion before the next one is
//! awaited, so ticks for one key never overlap. Cancellation goes through a
//! `watch` channel: an in-flight tick finishes, but the loop exits before
//! waiting for another.

use async_trait::async_trait;
use slotwatch_core::{MonitorKind, TenantId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub type JobKey = (TenantId, MonitorKind);

/// Work run on every tick.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn on_tick(&self, tenant: TenantId, kind: MonitorKind);
}

struct JobHandle {
    interval: Duration,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    fn cancel(self) {
        // receiver gone means the task already exited
        let _ = self.cancel.send(true);
        drop(self.task);
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobKey, JobHandle>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a job, replacing any live job for the same key.
    /// Returns true if a job was replaced.
    pub fn start(
        &self,
        tenant: TenantId,
        kind: MonitorKind,
        interval: Duration,
        handler: Arc<dyn TickHandler>,
    ) -> bool {
        let interval = interval.max(Duration::from_millis(1));
        let (cancel, cancel_rx) = watch::channel(false);

        let mut jobs = self.lock();
        let replaced = jobs.remove(&(tenant, kind)).map(JobHandle::cancel).is_some();
        let task = tokio::spawn(run_job(tenant, kind, interval, handler, cancel_rx));
        jobs.insert(
            (tenant, kind),
            JobHandle {
                interval,
                cancel,
                task,
            },
        );
        info!(tenant, kind = %kind, interval_secs = interval.as_secs(), replaced, "Job started");
        replaced
    }

    /// Cancel and remove a job. Returns whether one existed.
    pub fn stop(&self, tenant: TenantId, kind: MonitorKind) -> bool {
        let removed = self.lock().remove(&(tenant, kind));
        match removed {
            Some(handle) => {
                handle.cancel();
                info!(tenant, kind = %kind, "Job stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, tenant: TenantId, kind: MonitorKind) -> bool {
        self.lock().contains_key(&(tenant, kind))
    }

    pub fn interval(&self, tenant: TenantId, kind: MonitorKind) -> Option<Duration> {
        self.lock().get(&(tenant, kind)).map(|h| h.interval)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every job.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<JobHandle> = self.lock().drain().map(|(_, h)| h).collect();
        let count = drained.len();
        drained.into_iter().for_each(JobHandle::cancel);
        count
    }
}

async fn run_job(
    tenant: TenantId,
    kind: MonitorKind,
    period: Duration,
    handler: Arc<dyn TickHandler>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        if *cancel.borrow() {
            break;
        }
        handler.on_tick(tenant, kind).await;
    }
    debug!(tenant, kind = %kind, "Job loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl TickHandler for Counter {
        async fn on_tick(&self, _tenant: TenantId, _kind: MonitorKind) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Counts entries, then parks until released.
    #[derive(Default)]
    struct Gated {
        entered: AtomicUsize,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl TickHandler for Gated {
        async fn on_tick(&self, _tenant: TenantId, _kind: MonitorKind) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_then_periodic() {
        let registry = JobRegistry::new();
        let counter = Arc::new(Counter::default());

        registry.start(1, MonitorKind::Coefficients, Duration::from_secs(60), counter.clone());
        settle().await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_one_live_timer() {
        let registry = JobRegistry::new();
        let counter = Arc::new(Counter::default());

        assert!(!registry.start(1, MonitorKind::Coefficients, Duration::from_secs(60), counter.clone()));
        settle().await;
        assert!(registry.start(1, MonitorKind::Coefficients, Duration::from_secs(60), counter.clone()));
        settle().await;
        assert_eq!(registry.len(), 1);
        let after_restart = counter.ticks.load(Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        // only the replacement job ticks
        assert_eq!(counter.ticks.load(Ordering::SeqCst), after_restart + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_next_fire() {
        let registry = JobRegistry::new();
        let counter = Arc::new(Counter::default());

        registry.start(1, MonitorKind::Stock, Duration::from_secs(60), counter.clone());
        settle().await;
        assert!(registry.stop(1, MonitorKind::Stock));
        assert!(!registry.stop(1, MonitorKind::Stock));

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_tick_prevents_next_fire() {
        let registry = JobRegistry::new();
        let gated = Arc::new(Gated::default());

        registry.start(1, MonitorKind::Coefficients, Duration::from_secs(60), gated.clone());
        settle().await;
        assert_eq!(gated.entered.load(Ordering::SeqCst), 1);

        // tick is parked inside the handler
        assert!(registry.stop(1, MonitorKind::Coefficients));
        gated.release.notify_one();
        settle().await;

        tokio::time::advance(Duration::from_secs(300)).await;
        settle().await;
        gated.release.notify_one();
        settle().await;
        assert_eq!(gated.entered.load(Ordering::SeqCst), 1);
        assert!(!registry.is_running(1, MonitorKind::Coefficients));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let registry = JobRegistry::new();
        let counter = Arc::new(Counter::default());

        registry.start(1, MonitorKind::Coefficients, Duration::from_secs(300), counter.clone());
        registry.start(1, MonitorKind::Stock, Duration::from_secs(7200), counter.clone());
        registry.start(2, MonitorKind::Coefficients, Duration::from_secs(300), counter.clone());

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.interval(1, MonitorKind::Stock),
            Some(Duration::from_secs(7200))
        );
        assert_eq!(registry.stop_all(), 3);
        assert!(!registry.is_running(2, MonitorKind::Coefficients));
    }
}
