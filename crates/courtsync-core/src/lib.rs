//! CourtSync Core
//!
//! Periodic reconciliation of stored legal cases against an authoritative
//! court-status source.
//!
//! ## Key Components
//!
//! - `Scheduler`: cron cadence plus the exclusive run lock
//! - `SyncRun`: one bounded-concurrency pass producing a `SyncRunReport`
//! - `CourtStatusProvider`: `MockProvider` and `RemoteProvider`, wrapped by `fetch_with_retry`
//! - `detector::diff`: pure field-level change detection
//! - `CaseUpdater`: optimistic-concurrency writes through `CaseStore`
//! - `AuditSink`: where finalized reports go

pub mod audit;
pub mod config;
pub mod detector;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod provider;
pub mod report;
pub mod run;
pub mod schedule;
pub mod scheduler;
pub mod source;
pub mod telemetry;
pub mod updater;

pub use audit::{AuditSink, FanoutAuditSink, JsonFileAuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{ProviderKind, Settings};
pub use detector::diff;
pub use domain::{
    ChangeSet, CnrLookup, CnrResolution, ConfigError, CourtStatusSnapshot, FieldChange,
    FieldValue, ProviderError, Result, ScheduleError, SourceUnavailable, SyncError, TrackedField,
    UpdateError,
};
pub use provider::{
    fetch_with_retry, CourtStatusProvider, MockBehavior, MockProvider, RemoteProvider,
    RemoteProviderConfig, RetryPolicy,
};
pub use report::{
    CaseOutcome, FailedCase, FailureReason, ReportBuilder, RunOutcome, RunTrigger, SyncRunReport,
};
pub use run::{
    CancelHandle, CancelSignal, RunState, SyncContext, SyncRun, SyncRunConfig,
    CANCELLED_BEFORE_SNAPSHOT,
};
pub use schedule::CronSchedule;
pub use scheduler::{Scheduler, SchedulerConfig, TriggerOutcome};
pub use source::{CaseSource, StoreCaseSource};
pub use updater::{AppliedResult, CaseUpdater};

pub use courtsync_state::{
    CaseId, CasePatch, CaseRecord, CaseStatus, CaseStore, MemoryCaseStore, StorageError,
    SurrealCaseStore, WriteOutcome,
};
