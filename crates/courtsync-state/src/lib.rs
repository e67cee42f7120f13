//! CourtSync-State: case persistence for the court sync engine
//!
//! This crate owns the persisted case record and the storage contract the
//! reconciliation engine consumes.
//!
//! ## Key Components
//!
//! - `CaseRecord`: the stored case (stage, next hearing date, sync version)
//! - `CaseStore`: read snapshot + version-guarded conditional write
//! - `MemoryCaseStore`: in-memory fake for tests and demos
//! - `SurrealCaseStore`: SurrealDB backend (`mem://`, `surrealkv://`, `ws://`)

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::MemoryCaseStore;
pub use schema::{CaseId, CasePatch, CaseRecord, CaseStatus};
pub use storage_traits::{CaseStore, StorageResult, WriteOutcome};
pub use surreal_store::SurrealCaseStore;
