//! Cron-driven sync scheduling with a single run lock.
//!
//! Scheduled ticks and manual triggers compete for the same lock. Whoever
//! loses does nothing: a scheduled tick is skipped (never queued) and a
//! manual trigger returns [`TriggerOutcome::Busy`]. The lock guard lives for
//! the whole run, including delivery to the audit sink, and is released on
//! every exit path when it is dropped.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::audit::AuditSink;
use crate::metrics::METRICS;
use crate::obs;
use crate::report::{RunTrigger, SyncRunReport};
use crate::run::{CancelHandle, CancelSignal, SyncContext, SyncRun, SyncRunConfig};
use crate::schedule::CronSchedule;

/// Result of asking for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The run happened; here is its report.
    Ran(SyncRunReport),
    /// Another run holds the lock. Nothing was done.
    Busy,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// When false, `start` does not spawn the cron loop.
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub run: SyncRunConfig,
}

struct Inner {
    ctx: SyncContext,
    config: SchedulerConfig,
    audit: Arc<dyn AuditSink>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancelHandle,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the sync cadence and the exclusive run lock. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(ctx: SyncContext, config: SchedulerConfig, audit: Arc<dyn AuditSink>) -> Self {
        let (shutdown, _) = CancelSignal::pair();
        Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                audit,
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
                shutdown,
                loop_task: Mutex::new(None),
            }),
        }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.inner.config.schedule
    }

    /// Spawn the cron loop. Returns false (and does nothing) if scheduling is
    /// disabled, the loop is already running, or the scheduler was shut down.
    pub fn start(&self) -> bool {
        if !self.inner.config.enabled {
            info!(cron = %self.inner.config.schedule, "scheduled court sync is disabled");
            return false;
        }
        if self.inner.shutdown.is_cancelled() {
            warn!("scheduler already shut down");
            return false;
        }

        let mut slot = self
            .inner
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("scheduler already started");
            return false;
        }

        info!(cron = %self.inner.config.schedule, "starting court sync scheduler");
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(cron_loop(inner)));
        true
    }

    /// Run now unless a run is already active.
    #[instrument(skip(self))]
    pub async fn trigger_manual(&self) -> TriggerOutcome {
        match self.inner.run_lock.clone().try_lock_owned() {
            Ok(guard) => TriggerOutcome::Ran(self.inner.run_locked(guard, RunTrigger::Manual).await),
            Err(_) => {
                METRICS.inc_triggers_rejected();
                obs::emit_trigger_rejected(RunTrigger::Manual.as_str());
                TriggerOutcome::Busy
            }
        }
    }

    /// Fire one scheduled tick now. The run proceeds on its own task; `None`
    /// means the tick was skipped because a run was active.
    pub fn fire_scheduled_tick(&self) -> Option<JoinHandle<SyncRunReport>> {
        Arc::clone(&self.inner).fire_tick()
    }

    /// Whether a run currently holds the lock.
    pub fn is_running(&self) -> bool {
        self.inner.run_lock.try_lock().is_err()
    }

    /// The next `count` scheduled fire times.
    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Utc>> {
        self.inner.config.schedule.upcoming(Utc::now(), count)
    }

    /// Stop the cron loop, cancel any active run, and wait for it to finalize.
    pub async fn shutdown(&self) {
        info!("shutting down court sync scheduler");
        self.inner.shutdown.cancel();

        let handle = self
            .inner
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
        // Released once the active run (if any) has been reported.
        let _idle = self.inner.run_lock.lock().await;
    }
}

impl Inner {
    fn fire_tick(self: Arc<Self>) -> Option<JoinHandle<SyncRunReport>> {
        match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => Some(tokio::spawn(async move {
                self.run_locked(guard, RunTrigger::Scheduled).await
            })),
            Err(_) => {
                METRICS.inc_triggers_rejected();
                obs::emit_trigger_rejected(RunTrigger::Scheduled.as_str());
                None
            }
        }
    }

    async fn run_locked(&self, _guard: OwnedMutexGuard<()>, trigger: RunTrigger) -> SyncRunReport {
        let run = SyncRun::new(self.ctx.clone(), trigger, self.config.run.clone());
        let report = run.execute(self.shutdown.signal()).await;
        if let Err(e) = self.audit.record(&report).await {
            obs::emit_audit_error(&report.run_id().to_string(), self.audit.name(), &e);
        }
        report
    }
}

async fn cron_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.signal();
    loop {
        let Some((next, wait)) = inner.config.schedule.until_next(Utc::now()) else {
            warn!(cron = %inner.config.schedule, "schedule has no future fire times");
            return;
        };
        debug!(next_run = %next, "next scheduled court sync");

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        if Arc::clone(&inner).fire_tick().is_none() {
            debug!("scheduled tick skipped");
        }
    }
}
