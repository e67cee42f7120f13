//! Sync run reports.
//!
//! A [`SyncRunReport`] is built by exactly one [`ReportBuilder`], owned by the
//! run's collector task, and is read-only once finished.

use chrono::{DateTime, Utc};
use courtsync_state::CaseId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChangeSet, ProviderError, UpdateError};
use crate::provider::FetchFailure;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every candidate produced an outcome (failures included).
    Completed,
    /// Cancelled before every candidate was processed.
    Partial,
    /// The candidate snapshot could not be taken.
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Partial => "partial",
            RunOutcome::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one case failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("court source still failing after {attempts} attempt(s): {message}")]
    ProviderTransientExhausted { attempts: u32, message: String },

    #[error("court source rejected the case: {message}")]
    ProviderPermanent { message: String },

    #[error("lost version race {attempts} times")]
    Conflict { attempts: u32 },

    #[error("case disappeared before it could be updated")]
    CaseMissing,

    #[error("store error: {message}")]
    Store { message: String },

    #[error("worker panicked: {message}")]
    WorkerPanicked { message: String },
}

impl From<FetchFailure> for FailureReason {
    fn from(failure: FetchFailure) -> Self {
        match failure.error {
            ProviderError::Transient(message) => FailureReason::ProviderTransientExhausted {
                attempts: failure.attempts,
                message,
            },
            ProviderError::Permanent(message) => FailureReason::ProviderPermanent { message },
        }
    }
}

impl From<UpdateError> for FailureReason {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Conflict { attempts, .. } => FailureReason::Conflict { attempts },
            UpdateError::CaseMissing { .. } => FailureReason::CaseMissing,
            UpdateError::Store(e) => FailureReason::Store {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCase {
    pub case_id: CaseId,
    pub reason: FailureReason,
}

/// The single outcome a worker reports for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Updated { new_version: u64, changes: ChangeSet },
    Unchanged,
    Failed(FailureReason),
    /// Never dispatched, or abandoned after cancellation.
    Skipped,
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunReport {
    run_id: Uuid,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    total_candidates: usize,
    updated_count: usize,
    unchanged_count: usize,
    failed_cases: Vec<FailedCase>,
    skipped_cases: Vec<CaseId>,
    outcome: RunOutcome,
    abort_reason: Option<String>,
}

impl SyncRunReport {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn trigger(&self) -> RunTrigger {
        self.trigger
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn total_candidates(&self) -> usize {
        self.total_candidates
    }

    pub fn updated_count(&self) -> usize {
        self.updated_count
    }

    pub fn unchanged_count(&self) -> usize {
        self.unchanged_count
    }

    /// Failed cases, ordered by case id.
    pub fn failed_cases(&self) -> &[FailedCase] {
        &self.failed_cases
    }

    /// Skipped cases, ordered by case id.
    pub fn skipped_cases(&self) -> &[CaseId] {
        &self.skipped_cases
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn failed(&self, case_id: &str) -> Option<&FailureReason> {
        self.failed_cases
            .iter()
            .find(|f| f.case_id.as_str() == case_id)
            .map(|f| &f.reason)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Accumulates case outcomes into a report. Owned by one collector.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
    total_candidates: usize,
    updated_count: usize,
    unchanged_count: usize,
    failed_cases: Vec<FailedCase>,
    skipped_cases: Vec<CaseId>,
}

impl ReportBuilder {
    pub fn new(run_id: Uuid, trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            trigger,
            started_at,
            total_candidates: 0,
            updated_count: 0,
            unchanged_count: 0,
            failed_cases: Vec::new(),
            skipped_cases: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn set_candidates(&mut self, total: usize) {
        self.total_candidates = total;
    }

    pub fn record(&mut self, case_id: CaseId, outcome: CaseOutcome) {
        match outcome {
            CaseOutcome::Updated { .. } => self.updated_count += 1,
            CaseOutcome::Unchanged => self.unchanged_count += 1,
            CaseOutcome::Failed(reason) => self.failed_cases.push(FailedCase { case_id, reason }),
            CaseOutcome::Skipped => self.skipped_cases.push(case_id),
        }
    }

    /// Number of outcomes recorded so far.
    pub fn recorded(&self) -> usize {
        self.updated_count + self.unchanged_count + self.failed_cases.len() + self.skipped_cases.len()
    }

    /// Finish a run that took its snapshot. `Partial` iff any case was skipped.
    pub fn finish(self, finished_at: DateTime<Utc>) -> SyncRunReport {
        let outcome = if self.skipped_cases.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::Partial
        };
        self.build(outcome, None, finished_at)
    }

    /// Finish a run whose snapshot failed.
    pub fn abort(self, reason: impl Into<String>, finished_at: DateTime<Utc>) -> SyncRunReport {
        self.build(RunOutcome::Aborted, Some(reason.into()), finished_at)
    }

    fn build(
        mut self,
        outcome: RunOutcome,
        abort_reason: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> SyncRunReport {
        self.failed_cases.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        self.skipped_cases.sort();
        SyncRunReport {
            run_id: self.run_id,
            trigger: self.trigger,
            started_at: self.started_at,
            finished_at: finished_at.max(self.started_at),
            total_candidates: self.total_candidates,
            updated_count: self.updated_count,
            unchanged_count: self.unchanged_count,
            failed_cases: self.failed_cases,
            skipped_cases: self.skipped_cases,
            outcome,
            abort_reason,
        }
    }
}
