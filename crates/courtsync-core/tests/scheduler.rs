//! Scheduler lock discipline, manual triggers and shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use courtsync_core::provider::ProviderResult;
use courtsync_core::{
    AuditSink, CaseRecord, CaseSource, CaseUpdater, CnrLookup, CnrResolution,
    CourtStatusProvider, CourtStatusSnapshot, CronSchedule, MemoryAuditSink, MemoryCaseStore,
    MockProvider, RunOutcome, RunTrigger, Scheduler, SchedulerConfig, SourceUnavailable,
    SyncContext, SyncRunConfig, TriggerOutcome,
};
use tokio::sync::{Notify, Semaphore};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn store_with(n: usize) -> Arc<MemoryCaseStore> {
    Arc::new(
        MemoryCaseStore::with_cases((1..=n).map(|i| {
            CaseRecord::new(format!("c{i:02}"), format!("TS/{i}/2024"), Some(format!("CNR-{i:02}")))
                .with_stage("Filing")
        }))
        .unwrap(),
    )
}

/// Blocks every fetch until the test opens the gate.
struct GatedProvider {
    inner: MockProvider,
    entered: Notify,
    gate: Semaphore,
}

impl GatedProvider {
    fn new() -> Self {
        Self {
            inner: MockProvider::new(date(2025, 1, 30)),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl CourtStatusProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await;
        self.inner.fetch(cnr_number).await
    }

    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution> {
        self.inner.resolve_cnr(lookup).await
    }
}

fn scheduler_with(
    store: Arc<MemoryCaseStore>,
    provider: Arc<dyn CourtStatusProvider>,
    cron: &str,
    enabled: bool,
) -> (Scheduler, MemoryAuditSink) {
    let audit = MemoryAuditSink::new();
    let config = SchedulerConfig {
        enabled,
        schedule: CronSchedule::parse(cron).unwrap(),
        run: SyncRunConfig {
            concurrency: 2,
            grace_period: Duration::from_millis(200),
            ..SyncRunConfig::default()
        },
    };
    let scheduler = Scheduler::new(
        SyncContext::from_store(store, provider),
        config,
        Arc::new(audit.clone()) as Arc<dyn AuditSink>,
    );
    (scheduler, audit)
}

#[tokio::test]
async fn test_manual_trigger_runs_and_audits() {
    let store = store_with(3);
    let (scheduler, audit) = scheduler_with(
        store.clone(),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        "0 0 2 * * ?",
        false,
    );

    let report = match scheduler.trigger_manual().await {
        TriggerOutcome::Ran(report) => report,
        TriggerOutcome::Busy => panic!("nothing else was running"),
    };

    assert_eq!(report.trigger(), RunTrigger::Manual);
    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.updated_count(), 3);
    assert_eq!(audit.reports(), vec![report]);
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_manual_trigger_during_scheduled_run_is_busy() {
    let store = store_with(4);
    let provider = Arc::new(GatedProvider::new());
    let (scheduler, audit) = scheduler_with(store.clone(), provider.clone(), "0 0 2 * * ?", true);

    let scheduled = scheduler
        .fire_scheduled_tick()
        .expect("lock should be free");
    provider.entered.notified().await;
    assert!(scheduler.is_running());

    assert_eq!(scheduler.trigger_manual().await, TriggerOutcome::Busy);
    assert!(
        scheduler.fire_scheduled_tick().is_none(),
        "overlapping tick must be skipped"
    );

    provider.open();
    let report = scheduled.await.unwrap();

    assert_eq!(report.trigger(), RunTrigger::Scheduled);
    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.updated_count(), 4);
    assert_eq!(audit.len(), 1);
    assert!(!scheduler.is_running());

    // The lock is free again once the run has been reported.
    assert!(matches!(
        scheduler.trigger_manual().await,
        TriggerOutcome::Ran(_)
    ));
}

#[tokio::test]
async fn test_concurrent_manual_triggers_run_once() {
    let store = store_with(2);
    let provider = Arc::new(GatedProvider::new());
    let (scheduler, _audit) = scheduler_with(store, provider.clone(), "0 0 2 * * ?", false);

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger_manual().await })
    };
    provider.entered.notified().await;

    assert_eq!(scheduler.trigger_manual().await, TriggerOutcome::Busy);

    provider.open();
    assert!(matches!(first.await.unwrap(), TriggerOutcome::Ran(_)));
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_start() {
    let (scheduler, _audit) = scheduler_with(
        store_with(1),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        "* * * * * *",
        false,
    );
    assert!(!scheduler.start());
    assert!(matches!(
        scheduler.trigger_manual().await,
        TriggerOutcome::Ran(_)
    ));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (scheduler, _audit) = scheduler_with(
        store_with(1),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        "0 0 2 * * ?",
        true,
    );
    assert!(scheduler.start());
    assert!(!scheduler.start());
    scheduler.shutdown().await;
    assert!(!scheduler.start(), "a shut-down scheduler stays down");
}

#[tokio::test]
async fn test_cron_loop_fires_scheduled_runs() {
    let store = store_with(1);
    let (scheduler, audit) = scheduler_with(
        store.clone(),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        "* * * * * *",
        true,
    );
    assert!(scheduler.start());

    tokio::time::timeout(Duration::from_secs(5), async {
        while audit.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("a scheduled run within five seconds");

    scheduler.shutdown().await;
    let reports = audit.reports();
    assert_eq!(reports[0].trigger(), RunTrigger::Scheduled);
    assert_eq!(store.snapshot(&"c01".into()).unwrap().sync_version, 1);
}

#[tokio::test]
async fn test_shutdown_cancels_active_run() {
    let store = store_with(3);
    let provider = Arc::new(GatedProvider::new());
    let (scheduler, audit) = scheduler_with(store, provider.clone(), "0 0 2 * * ?", true);

    let scheduled = scheduler.fire_scheduled_tick().unwrap();
    provider.entered.notified().await;

    scheduler.shutdown().await;
    let report = scheduled.await.unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.skipped_cases().len(), 3);
    assert_eq!(audit.len(), 1);
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_upcoming_uses_schedule() {
    let (scheduler, _audit) = scheduler_with(
        store_with(0),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        "0 0 2 * * ?",
        true,
    );
    let next = scheduler.upcoming(3);
    assert_eq!(next.len(), 3);
    assert!(next.windows(2).all(|w| (w[1] - w[0]).num_hours() == 24));
}

/// Snapshot read that never completes.
struct StuckSource;

#[async_trait]
impl CaseSource for StuckSource {
    async fn list_eligible_cases(&self) -> Result<Vec<CaseRecord>, SourceUnavailable> {
        futures::future::pending().await
    }
}

#[tokio::test]
async fn test_shutdown_releases_lock_held_by_stuck_snapshot() {
    let audit = MemoryAuditSink::new();
    let ctx = SyncContext::new(
        Arc::new(StuckSource),
        Arc::new(MockProvider::new(date(2025, 1, 30))),
        Arc::new(CaseUpdater::new(store_with(1))),
    );
    let scheduler = Scheduler::new(
        ctx,
        SchedulerConfig {
            enabled: true,
            schedule: CronSchedule::parse("0 0 2 * * ?").unwrap(),
            run: SyncRunConfig::default(),
        },
        Arc::new(audit.clone()) as Arc<dyn AuditSink>,
    );

    let scheduled = scheduler.fire_scheduled_tick().unwrap();
    tokio::task::yield_now().await;
    assert!(scheduler.is_running());
    assert_eq!(scheduler.trigger_manual().await, TriggerOutcome::Busy);

    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
        .await
        .expect("shutdown must not wait on a stuck snapshot");
    let report = scheduled.await.unwrap();

    assert_eq!(report.outcome(), RunOutcome::Aborted);
    assert!(!scheduler.is_running());
    assert_eq!(audit.len(), 1);
}
