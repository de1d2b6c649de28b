//! Retention scheduler: runs a cycle at startup and then on a fixed interval.
//!
//! Cycles do blocking filesystem work, so each one runs on the blocking
//! thread pool. At most one cycle runs at a time; a trigger that fires while
//! the previous cycle is still going is skipped and counted.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use super::cycle::{CycleReport, RetentionCycle};
use crate::{config::RetentionConfig, observability::metrics};

/// How long shutdown waits for an in-flight cycle.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Work performed on every trigger.
pub trait RetentionTask: Send + Sync + 'static {
    fn run_cycle(&self) -> CycleReport;
}

impl RetentionTask for RetentionCycle {
    fn run_cycle(&self) -> CycleReport {
        self.run()
    }
}

/// Ensures cycles never overlap. The permit is held for the full length of
/// a cycle, including any time it spends past its timeout.
#[derive(Debug, Clone, Default)]
pub struct CycleGate {
    lock: Arc<Mutex<()>>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit, or `None` if a cycle is already running.
    pub fn try_enter(&self) -> Option<OwnedMutexGuard<()>> {
        Arc::clone(&self.lock).try_lock_owned().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Counters kept by a scheduler over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_started: u64,
    pub triggers_skipped: u64,
}

/// Runs a [`RetentionTask`] on an interval until cancelled.
pub struct RetentionScheduler<T: RetentionTask> {
    task: Arc<T>,
    interval: Duration,
    cycle_timeout: Option<Duration>,
    shutdown_grace: Duration,
    gate: CycleGate,
}

impl RetentionScheduler<RetentionCycle> {
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(RetentionCycle::new(config), config.interval())
            .with_cycle_timeout(config.cycle_timeout())
    }
}

impl<T: RetentionTask> RetentionScheduler<T> {
    pub fn new(task: T, interval: Duration) -> Self {
        Self {
            task: Arc::new(task),
            interval,
            cycle_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            gate: CycleGate::new(),
        }
    }

    /// Report cycles that run longer than `timeout`.
    pub fn with_cycle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn gate(&self) -> &CycleGate {
        &self.gate
    }

    /// Trigger cycles until `shutdown` is cancelled. The first trigger fires
    /// immediately.
    ///
    /// On shutdown no new cycle starts. A cycle already running is given
    /// the shutdown grace period to finish before this returns.
    pub async fn run(self, shutdown: CancellationToken) -> SchedulerStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = SchedulerStats::default();
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(permit) = self.gate.try_enter() else {
                stats.triggers_skipped += 1;
                metrics::record_trigger_skipped();
                tracing::warn!("Previous retention cycle still running, skipping this trigger");
                continue;
            };

            stats.cycles_started += 1;
            in_flight = Some(self.spawn_cycle(permit));
        }

        tracing::info!(
            cycles_started = stats.cycles_started,
            triggers_skipped = stats.triggers_skipped,
            "Retention scheduler stopping"
        );

        if let Some(handle) = in_flight
            && !handle.is_finished()
        {
            tracing::info!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Waiting for in-flight retention cycle to finish"
            );
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                tracing::warn!("Retention cycle still running after the shutdown grace period");
            }
        }

        stats
    }

    fn spawn_cycle(&self, permit: OwnedMutexGuard<()>) -> JoinHandle<()> {
        let task = Arc::clone(&self.task);
        let cycle_timeout = self.cycle_timeout;

        tokio::spawn(async move {
            let mut cycle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task.run_cycle()
            });

            let result = match cycle_timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut cycle).await {
                    Ok(result) => result,
                    Err(_) => {
                        metrics::record_cycle_error("timeout");
                        tracing::error!(
                            timeout_secs = limit.as_secs(),
                            "Retention cycle exceeded its timeout; new cycles are held until it finishes"
                        );
                        cycle.await
                    }
                },
                None => cycle.await,
            };

            match result {
                Ok(report) if report.scan_failed() => {
                    tracing::warn!("Retention cycle could not scan the source directory");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Retention cycle task failed");
                }
            }
        })
    }
}

/// Run the retention scheduler for `config` until `shutdown` is cancelled.
pub async fn start_retention_worker(
    config: RetentionConfig,
    shutdown: CancellationToken,
) -> SchedulerStats {
    tracing::info!(
        directory = %config.source_directory.display(),
        interval_hours = config.interval_hours,
        archive_after_days = config.archive_after_days,
        delete_after_days = config.delete_after_days,
        extensions = ?config.valid_extensions,
        "Starting retention worker"
    );

    RetentionScheduler::from_config(&config).run(shutdown).await
}
