//! Domain models for court sync.
//!
//! - `CourtStatusSnapshot`: one case's status as the court reports it
//! - `ChangeSet`: field-level differences between a record and a snapshot
//! - error taxonomy shared by every component

pub mod change;
pub mod error;
pub mod snapshot;

pub use change::{ChangeSet, FieldChange, FieldValue, TrackedField};
pub use error::{
    ConfigError, ProviderError, Result, ScheduleError, SourceUnavailable, SyncError, UpdateError,
};
pub use snapshot::{CnrLookup, CnrResolution, CourtStatusSnapshot};
