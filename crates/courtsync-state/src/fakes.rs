//! In-memory fake for the case store (testing and demos)
//!
//! `MemoryCaseStore` satisfies the `CaseStore` contract without any external
//! dependencies, and adds a few knobs tests need: out-of-band mutation,
//! read-failure injection and forced version conflicts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::schema::{CaseId, CasePatch, CaseRecord};
use crate::storage_traits::{CaseStore, StorageResult, WriteOutcome};

/// In-memory case store backed by a `BTreeMap<case_id, CaseRecord>`.
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    cases: Mutex<BTreeMap<String, CaseRecord>>,
    fail_reads: AtomicBool,
    forced_conflicts: AtomicU32,
    writes: AtomicU64,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `cases`.
    pub fn with_cases(cases: impl IntoIterator<Item = CaseRecord>) -> StorageResult<Self> {
        let store = Self::new();
        for case in cases {
            store.insert(case)?;
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CaseRecord>> {
        self.cases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new case, enforcing uniqueness of id, case number and CNR.
    pub fn insert(&self, case: CaseRecord) -> StorageResult<()> {
        let mut cases = self.lock();
        if cases.contains_key(case.id.as_str()) {
            return Err(StorageError::Duplicate {
                field: "id",
                value: case.id.to_string(),
            });
        }
        for existing in cases.values() {
            if existing.case_number == case.case_number {
                return Err(StorageError::Duplicate {
                    field: "case_number",
                    value: case.case_number.clone(),
                });
            }
            if case.cnr_number.is_some() && existing.cnr_number == case.cnr_number {
                return Err(StorageError::Duplicate {
                    field: "cnr_number",
                    value: case.cnr_number.clone().unwrap_or_default(),
                });
            }
        }
        cases.insert(case.id.0.clone(), case);
        Ok(())
    }

    /// Current copy of a case, if present.
    pub fn snapshot(&self, id: &CaseId) -> Option<CaseRecord> {
        self.lock().get(id.as_str()).cloned()
    }

    /// Edit a case out-of-band (as another writer would), bumping its version.
    pub fn mutate<F>(&self, id: &CaseId, f: F) -> StorageResult<u64>
    where
        F: FnOnce(&mut CaseRecord),
    {
        let mut cases = self.lock();
        let case = cases
            .get_mut(id.as_str())
            .ok_or_else(|| StorageError::CaseNotFound {
                case_id: id.to_string(),
            })?;
        f(case);
        case.sync_version += 1;
        Ok(case.sync_version)
    }

    /// Make subsequent reads fail with a backend error until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` conditional writes lose to a simulated concurrent writer.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of successful conditional writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("case store unavailable".to_string()));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn list_sync_eligible(&self) -> StorageResult<Vec<CaseRecord>> {
        self.check_reads()?;
        let cases = self.lock();
        Ok(cases
            .values()
            .filter(|c| c.is_sync_eligible())
            .cloned()
            .collect())
    }

    async fn get_case(&self, id: &CaseId) -> StorageResult<Option<CaseRecord>> {
        self.check_reads()?;
        Ok(self.lock().get(id.as_str()).cloned())
    }

    async fn write_if_version(
        &self,
        id: &CaseId,
        expected_version: u64,
        patch: &CasePatch,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<WriteOutcome> {
        let forced = self.take_forced_conflict();
        let mut cases = self.lock();
        let case = cases
            .get_mut(id.as_str())
            .ok_or_else(|| StorageError::CaseNotFound {
                case_id: id.to_string(),
            })?;

        if forced {
            case.sync_version += 1;
        }
        if case.sync_version != expected_version {
            return Ok(WriteOutcome::VersionMismatch {
                current_version: case.sync_version,
            });
        }

        patch.apply_to(case);
        case.sync_version += 1;
        case.last_synced_at = Some(synced_at);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Written {
            new_version: case.sync_version,
        })
    }
}
