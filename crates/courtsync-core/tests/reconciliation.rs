//! End-to-end sync runs against the in-memory store and the mock provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use courtsync_core::provider::ProviderResult;
use courtsync_core::{
    CancelSignal, CaseId, CaseRecord, CnrLookup, CnrResolution, CourtStatusProvider,
    CaseSource, CaseUpdater, CourtStatusSnapshot, FailureReason, MemoryCaseStore, MockBehavior,
    MockProvider, RetryPolicy, RunOutcome, RunTrigger, SourceUnavailable, SyncContext, SyncRun,
    SyncRunConfig, SyncRunReport, CANCELLED_BEFORE_SNAPSHOT,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn cnr(i: usize) -> String {
    format!("CNR-{i:02}")
}

fn case(i: usize) -> CaseRecord {
    CaseRecord::new(format!("c{i:02}"), format!("TS/{i}/2024"), Some(cnr(i)))
        .with_title(format!("State vs Party {i}"))
        .with_court("Patna High Court")
        .with_stage("Filing")
        .with_next_hearing(date(2025, 2, 1))
}

fn store_with(n: usize) -> Arc<MemoryCaseStore> {
    Arc::new(MemoryCaseStore::with_cases((1..=n).map(case)).unwrap())
}

/// Default mock answer: "Arguments Stage", next hearing 2025-03-01.
fn mock() -> MockProvider {
    MockProvider::new(date(2025, 1, 30))
}

fn config() -> SyncRunConfig {
    SyncRunConfig {
        concurrency: 4,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            per_attempt_timeout: Duration::from_secs(60),
        },
        run_timeout: None,
        grace_period: Duration::from_secs(2),
    }
}

async fn run(
    store: &Arc<MemoryCaseStore>,
    provider: Arc<dyn CourtStatusProvider>,
    config: SyncRunConfig,
) -> SyncRunReport {
    SyncRun::new(
        SyncContext::from_store(store.clone(), provider),
        RunTrigger::Manual,
        config,
    )
    .execute(CancelSignal::never())
    .await
}

#[tokio::test]
async fn test_changed_hearing_and_stage_are_written_once() {
    let store = store_with(1);
    let report = run(&store, Arc::new(mock()), config()).await;

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.total_candidates(), 1);
    assert_eq!(report.updated_count(), 1);
    assert!(report.failed_cases().is_empty());

    let stored = store.snapshot(&CaseId::from("c01")).unwrap();
    assert_eq!(stored.stage.as_deref(), Some("Arguments Stage"));
    assert_eq!(stored.next_hearing_date, Some(date(2025, 3, 1)));
    assert_eq!(stored.sync_version, 1);
    assert!(stored.last_synced_at.is_some());
    assert_eq!(stored.case_title, "State vs Party 1");
}

#[tokio::test]
async fn test_matching_status_causes_no_write() {
    let store = Arc::new(
        MemoryCaseStore::with_cases([case(1)
            .with_stage("Arguments Stage")
            .with_next_hearing(date(2025, 3, 1))])
        .unwrap(),
    );
    let report = run(&store, Arc::new(mock()), config()).await;

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.unchanged_count(), 1);
    assert_eq!(report.updated_count(), 0);
    assert_eq!(store.write_count(), 0);
    assert_eq!(store.snapshot(&"c01".into()).unwrap().sync_version, 0);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let store = store_with(5);
    let provider: Arc<dyn CourtStatusProvider> = Arc::new(mock());

    let first = run(&store, provider.clone(), config()).await;
    assert_eq!(first.updated_count(), 5);
    let writes = store.write_count();

    let second = run(&store, provider, config()).await;
    assert_eq!(second.updated_count(), 0);
    assert_eq!(second.unchanged_count(), 5);
    assert_eq!(store.write_count(), writes);
    for i in 1..=5 {
        let id = CaseId::new(format!("c{i:02}"));
        assert_eq!(store.snapshot(&id).unwrap().sync_version, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_exhausted_case_does_not_stop_the_others() {
    let store = store_with(10);
    let provider = Arc::new(mock().with_behavior(&cnr(4), MockBehavior::AlwaysTransient));

    let report = run(&store, provider.clone(), config()).await;

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.total_candidates(), 10);
    assert_eq!(report.updated_count(), 9);
    assert_eq!(report.failed_cases().len(), 1);
    assert!(matches!(
        report.failed("c04"),
        Some(FailureReason::ProviderTransientExhausted { attempts: 3, .. })
    ));
    assert_eq!(provider.calls(&cnr(4)), 3);
    assert_eq!(store.snapshot(&"c04".into()).unwrap().sync_version, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_within_budget_still_update() {
    let store = store_with(1);
    let provider = Arc::new(mock().with_behavior(&cnr(1), MockBehavior::TransientTimes(2)));

    let report = run(&store, provider.clone(), config()).await;

    assert_eq!(report.updated_count(), 1);
    assert_eq!(provider.calls(&cnr(1)), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let store = store_with(3);
    let provider = Arc::new(mock().with_behavior(
        &cnr(2),
        MockBehavior::Permanent("no such case".into()),
    ));

    let report = run(&store, provider.clone(), config()).await;

    assert_eq!(report.updated_count(), 2);
    assert!(matches!(
        report.failed("c02"),
        Some(FailureReason::ProviderPermanent { message }) if message == "no such case"
    ));
    assert_eq!(provider.calls(&cnr(2)), 1);
}

#[tokio::test]
async fn test_null_fields_never_blank_stored_values() {
    let store = store_with(1);
    let provider = Arc::new(mock().with_status(&cnr(1), None, None));

    let report = run(&store, provider, config()).await;

    assert_eq!(report.unchanged_count(), 1);
    let stored = store.snapshot(&"c01".into()).unwrap();
    assert_eq!(stored.stage.as_deref(), Some("Filing"));
    assert_eq!(stored.next_hearing_date, Some(date(2025, 2, 1)));
}

#[tokio::test]
async fn test_repeated_version_conflict_fails_the_case() {
    let store = store_with(1);
    store.force_conflicts(2);

    let report = run(&store, Arc::new(mock()), config()).await;

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(
        report.failed("c01"),
        Some(&FailureReason::Conflict { attempts: 2 })
    );
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_source_failure_aborts_without_fetching() {
    let store = store_with(3);
    store.set_fail_reads(true);
    let provider = Arc::new(mock());

    let report = run(&store, provider.clone(), config()).await;

    assert_eq!(report.outcome(), RunOutcome::Aborted);
    assert_eq!(report.total_candidates(), 0);
    assert!(report.abort_reason().unwrap().contains("unavailable"));
    assert_eq!(provider.total_calls(), 0);
}

/// A case source whose snapshot never completes.
struct HangingSource;

#[async_trait]
impl CaseSource for HangingSource {
    async fn list_eligible_cases(&self) -> Result<Vec<CaseRecord>, SourceUnavailable> {
        futures::future::pending().await
    }
}

fn hanging_run(provider: Arc<MockProvider>, cfg: SyncRunConfig) -> SyncRun {
    let store = store_with(1);
    SyncRun::new(
        SyncContext::new(
            Arc::new(HangingSource),
            provider,
            Arc::new(CaseUpdater::new(store)),
        ),
        RunTrigger::Scheduled,
        cfg,
    )
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_a_hanging_snapshot() {
    let provider = Arc::new(mock());
    let mut cfg = config();
    cfg.run_timeout = Some(Duration::from_secs(5));

    let report = tokio::time::timeout(
        Duration::from_secs(3600),
        hanging_run(provider.clone(), cfg).execute(CancelSignal::never()),
    )
    .await
    .expect("run must end at its deadline");

    assert_eq!(report.outcome(), RunOutcome::Aborted);
    assert_eq!(report.abort_reason(), Some(CANCELLED_BEFORE_SNAPSHOT));
    assert_eq!(report.total_candidates(), 0);
    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_a_hanging_snapshot() {
    let provider = Arc::new(mock());
    let (handle, signal) = CancelSignal::pair();
    let task = tokio::spawn(hanging_run(provider, config()).execute(signal));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();
    let report = tokio::time::timeout(Duration::from_secs(3600), task)
        .await
        .expect("cancel must end the run")
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Aborted);
    assert_eq!(report.abort_reason(), Some(CANCELLED_BEFORE_SNAPSHOT));
}

#[tokio::test]
async fn test_ineligible_cases_are_not_candidates() {
    let store = store_with(2);
    store
        .insert(CaseRecord::new("c90", "TS/90/2024", None))
        .unwrap();
    store
        .insert(
            CaseRecord::new("c91", "TS/91/2024", Some("CNR-91".into()))
                .with_status(courtsync_core::CaseStatus::Disposed),
        )
        .unwrap();

    let report = run(&store, Arc::new(mock()), config()).await;

    assert_eq!(report.total_candidates(), 2);
    assert_eq!(report.updated_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_marks_unprocessed_cases_skipped() {
    let store = store_with(3);
    let mut provider = mock();
    for i in 1..=3 {
        provider = provider.with_delay(&cnr(i), Duration::from_secs(30));
    }
    let mut cfg = config();
    cfg.concurrency = 1;

    let (handle, signal) = CancelSignal::pair();
    let run = SyncRun::new(
        SyncContext::from_store(store.clone(), Arc::new(provider)),
        RunTrigger::Manual,
        cfg,
    );
    let task = tokio::spawn(run.execute(signal));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();
    let report = task.await.unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.total_candidates(), 3);
    assert_eq!(report.updated_count(), 0);
    let skipped: Vec<_> = report.skipped_cases().iter().map(|c| c.as_str()).collect();
    assert_eq!(skipped, vec!["c01", "c02", "c03"]);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_case_finishing_within_grace_is_kept() {
    let store = store_with(2);
    let provider = mock()
        .with_delay(&cnr(1), Duration::from_secs(3))
        .with_delay(&cnr(2), Duration::from_secs(3));
    let mut cfg = config();
    cfg.concurrency = 1;
    cfg.grace_period = Duration::from_secs(10);

    let (handle, signal) = CancelSignal::pair();
    let task = tokio::spawn(
        SyncRun::new(
            SyncContext::from_store(store.clone(), Arc::new(provider)),
            RunTrigger::Manual,
            cfg,
        )
        .execute(signal),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();
    let report = task.await.unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.updated_count(), 1);
    assert_eq!(report.skipped_cases(), &[CaseId::from("c02")]);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_cancels_remaining_work() {
    let store = store_with(3);
    let provider = mock()
        .with_delay(&cnr(2), Duration::from_secs(30))
        .with_delay(&cnr(3), Duration::from_secs(30));
    let mut cfg = config();
    cfg.concurrency = 1;
    cfg.run_timeout = Some(Duration::from_secs(5));
    cfg.grace_period = Duration::from_secs(1);

    let report = run(&store, Arc::new(provider), cfg).await;

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.updated_count(), 1);
    let skipped: Vec<_> = report.skipped_cases().iter().map(|c| c.as_str()).collect();
    assert_eq!(skipped, vec!["c02", "c03"]);
}

#[tokio::test]
async fn test_cancel_after_all_cases_finish_is_completed() {
    let store = store_with(2);
    let (handle, signal) = CancelSignal::pair();
    let report = SyncRun::new(
        SyncContext::from_store(store.clone(), Arc::new(mock())),
        RunTrigger::Scheduled,
        config(),
    )
    .execute(signal)
    .await;
    handle.cancel();

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.trigger(), RunTrigger::Scheduled);
}

/// Panics for one CNR, delegates otherwise.
struct PanickyProvider {
    inner: MockProvider,
    panic_on: String,
}

#[async_trait]
impl CourtStatusProvider for PanickyProvider {
    fn name(&self) -> &str {
        "panicky"
    }

    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot> {
        if cnr_number == self.panic_on {
            panic!("parser blew up on {cnr_number}");
        }
        self.inner.fetch(cnr_number).await
    }

    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution> {
        self.inner.resolve_cnr(lookup).await
    }
}

#[tokio::test]
async fn test_worker_panic_is_a_case_failure() {
    let store = store_with(3);
    let provider = Arc::new(PanickyProvider {
        inner: mock(),
        panic_on: cnr(2),
    });

    let report = run(&store, provider, config()).await;

    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.updated_count(), 2);
    match report.failed("c02") {
        Some(FailureReason::WorkerPanicked { message }) => {
            assert!(message.contains("parser blew up"))
        }
        other => panic!("expected WorkerPanicked, got {other:?}"),
    }
}

/// Records the peak number of concurrent fetches.
struct CountingProvider {
    inner: MockProvider,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CourtStatusProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = self.inner.fetch(cnr_number).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution> {
        self.inner.resolve_cnr(lookup).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let store = store_with(12);
    let provider = Arc::new(CountingProvider {
        inner: mock(),
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut cfg = config();
    cfg.concurrency = 3;

    let report = run(&store, provider.clone(), cfg).await;

    assert_eq!(report.updated_count(), 12);
    let peak = provider.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded bound");
    assert!(peak >= 2, "expected some parallelism, peak was {peak}");
}
