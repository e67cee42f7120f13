//! Applies change sets to stored cases under optimistic concurrency.
//!
//! A write only lands if the stored `sync_version` still equals the version
//! the change set was computed against. On a mismatch the case is re-read and
//! re-diffed once against the same snapshot; a second mismatch is a conflict.

use std::sync::Arc;

use courtsync_state::{CaseId, CaseStore, StorageError, WriteOutcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detector;
use crate::domain::{ChangeSet, CourtStatusSnapshot, UpdateError};
use crate::obs;

/// Write attempts per case before giving up with a conflict.
pub const MAX_WRITE_ATTEMPTS: u32 = 2;

/// Result of a successful [`CaseUpdater::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AppliedResult {
    /// The changes were written and the case now carries `new_version`.
    Applied { new_version: u64, changes: ChangeSet },
    /// Nothing needed writing (empty set, or a concurrent writer got there first).
    Unchanged,
}

pub struct CaseUpdater {
    store: Arc<dyn CaseStore>,
}

impl CaseUpdater {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self { store }
    }

    /// Write `changes` to `case_id` if its version is still `expected_version`.
    ///
    /// `snapshot` is the court status the changes were derived from; it is
    /// used to re-diff after a lost race and its `fetched_at` becomes the
    /// case's `last_synced_at`.
    pub async fn apply(
        &self,
        case_id: &CaseId,
        changes: &ChangeSet,
        expected_version: u64,
        snapshot: &CourtStatusSnapshot,
    ) -> Result<AppliedResult, UpdateError> {
        if changes.is_empty() {
            return Ok(AppliedResult::Unchanged);
        }

        let mut changes = changes.clone();
        let mut expected = expected_version;
        let mut attempt = 1;

        loop {
            let outcome = self
                .store
                .write_if_version(case_id, expected, &changes.to_patch(), snapshot.fetched_at)
                .await
                .map_err(|e| missing_or_store(case_id, e))?;

            match outcome {
                WriteOutcome::Written { new_version } => {
                    for change in &changes {
                        obs::emit_case_changed(case_id.as_str(), change);
                    }
                    return Ok(AppliedResult::Applied {
                        new_version,
                        changes,
                    });
                }
                WriteOutcome::VersionMismatch { current_version } if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(
                        case_id = %case_id,
                        expected,
                        current_version,
                        "version mismatch, re-reading case"
                    );
                    let fresh = self
                        .store
                        .get_case(case_id)
                        .await?
                        .ok_or_else(|| UpdateError::CaseMissing {
                            case_id: case_id.to_string(),
                        })?;
                    changes = detector::diff(&fresh, snapshot);
                    if changes.is_empty() {
                        return Ok(AppliedResult::Unchanged);
                    }
                    expected = fresh.sync_version;
                    attempt += 1;
                }
                WriteOutcome::VersionMismatch { .. } => {
                    return Err(UpdateError::Conflict {
                        case_id: case_id.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

fn missing_or_store(case_id: &CaseId, err: StorageError) -> UpdateError {
    match err {
        StorageError::CaseNotFound { .. } => UpdateError::CaseMissing {
            case_id: case_id.to_string(),
        },
        other => UpdateError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use courtsync_state::{CaseRecord, MemoryCaseStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Arc<MemoryCaseStore>, CaseUpdater, CaseRecord, CourtStatusSnapshot) {
        let record = CaseRecord::new("c1", "TS/1/2024", Some("CNR-1".into()))
            .with_stage("Filing")
            .with_next_hearing(date(2025, 2, 1));
        let store = Arc::new(MemoryCaseStore::with_cases([record.clone()]).unwrap());
        let updater = CaseUpdater::new(store.clone());
        let snapshot = CourtStatusSnapshot::new("CNR-1", Utc.with_ymd_and_hms(2025, 2, 1, 2, 0, 0).unwrap())
            .with_stage("Arguments Stage")
            .with_next_hearing(date(2025, 3, 1));
        (store, updater, record, snapshot)
    }

    #[tokio::test]
    async fn test_apply_writes_and_bumps_version() {
        let (store, updater, record, snapshot) = setup();
        let changes = detector::diff(&record, &snapshot);

        let result = updater
            .apply(&record.id, &changes, record.sync_version, &snapshot)
            .await
            .unwrap();
        assert_eq!(
            result,
            AppliedResult::Applied {
                new_version: 1,
                changes
            }
        );

        let stored = store.snapshot(&record.id).unwrap();
        assert_eq!(stored.stage.as_deref(), Some("Arguments Stage"));
        assert_eq!(stored.next_hearing_date, Some(date(2025, 3, 1)));
        assert_eq!(stored.sync_version, 1);
        assert_eq!(stored.last_synced_at, Some(snapshot.fetched_at));
    }

    #[tokio::test]
    async fn test_empty_change_set_never_writes() {
        let (store, updater, record, snapshot) = setup();
        let result = updater
            .apply(&record.id, &ChangeSet::new(), 0, &snapshot)
            .await
            .unwrap();
        assert_eq!(result, AppliedResult::Unchanged);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_single_mismatch_rediffs_and_applies() {
        let (store, updater, record, snapshot) = setup();
        let changes = detector::diff(&record, &snapshot);
        store.force_conflicts(1);

        let result = updater.apply(&record.id, &changes, 0, &snapshot).await.unwrap();
        match result {
            AppliedResult::Applied { new_version, .. } => assert_eq!(new_version, 2),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_writer_already_applied_is_unchanged() {
        let (store, updater, record, snapshot) = setup();
        let changes = detector::diff(&record, &snapshot);
        store
            .mutate(&record.id, |c| {
                c.stage = Some("Arguments Stage".into());
                c.next_hearing_date = Some(date(2025, 3, 1));
            })
            .unwrap();

        let result = updater.apply(&record.id, &changes, 0, &snapshot).await.unwrap();
        assert_eq!(result, AppliedResult::Unchanged);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rediff_only_writes_remaining_field() {
        let (store, updater, record, snapshot) = setup();
        let changes = detector::diff(&record, &snapshot);
        store
            .mutate(&record.id, |c| c.stage = Some("Arguments Stage".into()))
            .unwrap();

        let result = updater.apply(&record.id, &changes, 0, &snapshot).await.unwrap();
        match result {
            AppliedResult::Applied { new_version, changes } => {
                assert_eq!(new_version, 2);
                assert_eq!(changes.len(), 1);
                assert!(changes
                    .get(crate::domain::TrackedField::NextHearingDate)
                    .is_some());
            }
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_mismatches_is_conflict() {
        let (store, updater, record, snapshot) = setup();
        let changes = detector::diff(&record, &snapshot);
        store.force_conflicts(2);

        let err = updater.apply(&record.id, &changes, 0, &snapshot).await.unwrap_err();
        assert_eq!(
            err,
            UpdateError::Conflict {
                case_id: "c1".into(),
                attempts: 2
            }
        );
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_case() {
        let (_store, updater, _record, snapshot) = setup();
        let ghost = CaseRecord::new("ghost", "TS/9/2024", Some("CNR-9".into()));
        let changes = detector::diff(&ghost, &snapshot);

        let err = updater.apply(&ghost.id, &changes, 0, &snapshot).await.unwrap_err();
        assert!(matches!(err, UpdateError::CaseMissing { .. }));
    }
}
