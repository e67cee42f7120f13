//! One reconciliation pass over all sync-eligible cases.
//!
//! ```text
//! Pending -> Running -> Completed | Partial | Aborted
//! ```
//!
//! The run snapshots its candidates, then feeds them through a
//! semaphore-bounded pool of tasks. Each task fetches, diffs and applies one
//! case and returns exactly one [`CaseOutcome`]. The run task itself is the
//! only collector: it drains the `JoinSet` and owns the [`ReportBuilder`].
//!
//! On cancellation (external signal or run deadline) dispatch stops at once,
//! in-flight tasks get a grace period, and whatever is still running after
//! that is aborted. Cases that never produced an outcome are reported as
//! skipped.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courtsync_state::{CaseId, CaseRecord, CaseStore};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::detector;
use crate::metrics::METRICS;
use crate::obs::{self, RunSpan};
use crate::provider::{fetch_with_retry, CourtStatusProvider, RetryPolicy};
use crate::report::{CaseOutcome, FailureReason, ReportBuilder, RunOutcome, RunTrigger, SyncRunReport};
use crate::source::{CaseSource, StoreCaseSource};
use crate::updater::{AppliedResult, CaseUpdater};

/// Abort reason when cancellation wins the race against the case snapshot.
pub const CANCELLED_BEFORE_SNAPSHOT: &str = "cancelled before case snapshot";

/// Lifecycle of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Partial,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Partial | RunState::Aborted
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Partial)
                | (RunState::Running, RunState::Aborted)
        )
    }
}

impl From<RunOutcome> for RunState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Partial => RunState::Partial,
            RunOutcome::Aborted => RunState::Aborted,
        }
    }
}

/// Tuning for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunConfig {
    /// Maximum cases processed at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Cancel the run once this much time has passed.
    pub run_timeout: Option<Duration>,
    /// How long in-flight cases may finish after cancellation.
    pub grace_period: Duration,
}

impl Default for SyncRunConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            run_timeout: None,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Sending half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> CancelSignal {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|c| *c).await.is_err();
        if closed {
            futures::future::pending::<()>().await;
        }
    }
}

/// Collaborators a run needs. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub source: Arc<dyn CaseSource>,
    pub provider: Arc<dyn CourtStatusProvider>,
    pub updater: Arc<CaseUpdater>,
}

impl SyncContext {
    pub fn new(
        source: Arc<dyn CaseSource>,
        provider: Arc<dyn CourtStatusProvider>,
        updater: Arc<CaseUpdater>,
    ) -> Self {
        Self {
            source,
            provider,
            updater,
        }
    }

    /// Source and updater both backed by `store`.
    pub fn from_store(store: Arc<dyn CaseStore>, provider: Arc<dyn CourtStatusProvider>) -> Self {
        Self {
            source: Arc::new(StoreCaseSource::new(store.clone())),
            provider,
            updater: Arc::new(CaseUpdater::new(store)),
        }
    }
}

/// A single reconciliation pass.
pub struct SyncRun {
    run_id: Uuid,
    trigger: RunTrigger,
    ctx: SyncContext,
    config: SyncRunConfig,
    state: RunState,
}

impl SyncRun {
    pub fn new(ctx: SyncContext, trigger: RunTrigger, config: SyncRunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            ctx,
            config,
            state: RunState::Pending,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid run transition {:?} -> {:?}",
            self.state,
            next
        );
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            warn!(from = ?self.state, to = ?next, "ignoring invalid run transition");
        }
    }

    /// Run to completion and return the finalized report.
    pub async fn execute(mut self, cancel: CancelSignal) -> SyncRunReport {
        let run_id = self.run_id.to_string();
        let span = RunSpan::new(&run_id, self.trigger.as_str());
        async move {
            let report = self.execute_inner(cancel).await;
            self.transition(RunState::from(report.outcome()));
            obs::emit_run_finished(
                &run_id,
                report.outcome().as_str(),
                report.duration_ms(),
                report.updated_count(),
                report.unchanged_count(),
                report.failed_cases().len(),
                report.skipped_cases().len(),
            );
            METRICS.flush();
            report
        }
        .instrument(span.span())
        .await
    }

    async fn execute_inner(&mut self, cancel: CancelSignal) -> SyncRunReport {
        let mut report = ReportBuilder::new(self.run_id, self.trigger, Utc::now());
        METRICS.inc_runs_started();
        self.transition(RunState::Running);

        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);
        let cancelled = wait_for_cancel(cancel, deadline);
        tokio::pin!(cancelled);

        // A snapshot that is already available wins; its cases are then skipped.
        let listed = tokio::select! {
            biased;
            listed = self.ctx.source.list_eligible_cases() => listed,
            _ = &mut cancelled => {
                obs::emit_run_aborted(&self.run_id.to_string(), CANCELLED_BEFORE_SNAPSHOT);
                return report.abort(CANCELLED_BEFORE_SNAPSHOT.to_string(), Utc::now());
            }
        };
        let cases = match listed {
            Ok(cases) => cases,
            Err(e) => {
                obs::emit_run_aborted(&self.run_id.to_string(), &e.reason);
                return report.abort(e.to_string(), Utc::now());
            }
        };
        report.set_candidates(cases.len());
        obs::emit_run_started(&self.run_id.to_string(), self.trigger.as_str(), cases.len());

        let mut pending: VecDeque<CaseRecord> = cases.into();
        let mut in_flight: HashSet<CaseId> = HashSet::new();
        let mut tasks: JoinSet<(CaseId, CaseOutcome)> = JoinSet::new();
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut was_cancelled = false;

        loop {
            if pending.is_empty() && tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    was_cancelled = true;
                    break;
                }
                Some(joined) = tasks.join_next() => {
                    collect(joined, &mut report, &mut in_flight);
                }
                permit = permits.clone().acquire_owned(), if !pending.is_empty() => {
                    let Ok(permit) = permit else { break };
                    if let Some(case) = pending.pop_front() {
                        in_flight.insert(case.id.clone());
                        let span = tracing::info_span!("case", case_id = %case.id);
                        tasks.spawn(
                            process_case(self.ctx.clone(), case, self.config.retry.clone(), permit)
                                .instrument(span),
                        );
                    }
                }
                else => break,
            }
        }

        if was_cancelled {
            debug!(
                undispatched = pending.len(),
                in_flight = in_flight.len(),
                "run cancelled, draining"
            );
            for case in pending.drain(..) {
                report.record(case.id, CaseOutcome::Skipped);
            }
            self.drain_with_grace(&mut tasks, &mut report, &mut in_flight)
                .await;
            let mut abandoned: Vec<CaseId> = in_flight.drain().collect();
            abandoned.sort();
            for id in abandoned {
                report.record(id, CaseOutcome::Skipped);
            }
        }

        report.finish(Utc::now())
    }

    async fn drain_with_grace(
        &self,
        tasks: &mut JoinSet<(CaseId, CaseOutcome)>,
        report: &mut ReportBuilder,
        in_flight: &mut HashSet<CaseId>,
    ) {
        let grace = tokio::time::sleep(self.config.grace_period);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => break,
                joined = tasks.join_next() => match joined {
                    Some(joined) => collect(joined, report, in_flight),
                    None => return,
                },
            }
        }
        if !tasks.is_empty() {
            warn!(
                abandoned = tasks.len(),
                "grace period elapsed, aborting in-flight cases"
            );
        }
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            collect(joined, report, in_flight);
        }
    }
}

async fn wait_for_cancel(mut cancel: CancelSignal, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("run deadline reached");
                }
            }
        }
        None => cancel.cancelled().await,
    }
}

fn collect(
    joined: Result<(CaseId, CaseOutcome), JoinError>,
    report: &mut ReportBuilder,
    in_flight: &mut HashSet<CaseId>,
) {
    let (case_id, outcome) = match joined {
        Ok(done) => done,
        // Aborted tasks stay in `in_flight` and are reported as skipped.
        Err(e) => {
            if !e.is_cancelled() {
                warn!(error = %e, "case task ended without an outcome");
            }
            return;
        }
    };
    in_flight.remove(&case_id);

    match &outcome {
        CaseOutcome::Updated { .. } => METRICS.inc_cases_updated(),
        CaseOutcome::Failed(reason) => {
            METRICS.inc_cases_failed();
            obs::emit_case_failed(case_id.as_str(), reason);
        }
        CaseOutcome::Unchanged | CaseOutcome::Skipped => {}
    }
    report.record(case_id, outcome);
}

async fn process_case(
    ctx: SyncContext,
    case: CaseRecord,
    retry: RetryPolicy,
    _permit: OwnedSemaphorePermit,
) -> (CaseId, CaseOutcome) {
    let outcome = AssertUnwindSafe(reconcile_case(&ctx, &case, &retry))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            CaseOutcome::Failed(FailureReason::WorkerPanicked {
                message: panic_message(panic.as_ref()),
            })
        });
    (case.id, outcome)
}

/// fetch -> diff -> apply for one case.
async fn reconcile_case(ctx: &SyncContext, case: &CaseRecord, retry: &RetryPolicy) -> CaseOutcome {
    let Some(cnr) = case.cnr_number.as_deref() else {
        return CaseOutcome::Failed(FailureReason::ProviderPermanent {
            message: "case has no CNR".to_string(),
        });
    };

    let snapshot = match fetch_with_retry(ctx.provider.as_ref(), cnr, retry).await {
        Ok(fetched) => fetched.snapshot,
        Err(failure) => return CaseOutcome::Failed(failure.into()),
    };

    let changes = detector::diff(case, &snapshot);
    if changes.is_empty() {
        return CaseOutcome::Unchanged;
    }

    match ctx
        .updater
        .apply(&case.id, &changes, case.sync_version, &snapshot)
        .await
    {
        Ok(AppliedResult::Applied {
            new_version,
            changes,
        }) => CaseOutcome::Updated {
            new_version,
            changes,
        },
        Ok(AppliedResult::Unchanged) => CaseOutcome::Unchanged,
        Err(e) => CaseOutcome::Failed(e.into()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
