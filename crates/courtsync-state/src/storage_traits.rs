//! Storage trait definitions for CourtSync
//!
//! `CaseStore` is the contract the reconciliation engine consumes:
//! - a read snapshot of sync-eligible cases
//! - a point read of a single case
//! - a conditional write guarded by `sync_version`
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided in
//! the `fakes` module; `SurrealCaseStore` is the database-backed implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{CaseId, CasePatch, CaseRecord};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Outcome of a version-guarded write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// The patch was written; the record now carries `new_version`.
    Written { new_version: u64 },
    /// The stored version no longer matched the expected one; nothing was written.
    VersionMismatch { current_version: u64 },
}

/// Case persistence contract.
///
/// Guarantees:
/// - `list_sync_eligible` returns owned copies; later writes never alter a
///   previously returned snapshot.
/// - `write_if_version` is atomic per case: it either applies the whole
///   patch and bumps `sync_version` by exactly one, or writes nothing.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// All cases with status `ACTIVE` and a CNR number.
    async fn list_sync_eligible(&self) -> StorageResult<Vec<CaseRecord>>;

    /// Read a single case. Returns `Ok(None)` if it does not exist.
    async fn get_case(&self, id: &CaseId) -> StorageResult<Option<CaseRecord>>;

    /// Apply `patch` only if the stored `sync_version == expected_version`.
    ///
    /// On success `sync_version` becomes `expected_version + 1` and
    /// `last_synced_at` becomes `synced_at`. Returns
    /// `StorageError::CaseNotFound` if the case does not exist.
    async fn write_if_version(
        &self,
        id: &CaseId,
        expected_version: u64,
        patch: &CasePatch,
        synced_at: DateTime<Utc>,
    ) -> StorageResult<WriteOutcome>;
}
