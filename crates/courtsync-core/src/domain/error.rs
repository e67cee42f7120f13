//! Error taxonomy for court sync.
//!
//! Run-level errors (`SourceUnavailable`, `Cancelled`) abort or truncate a
//! whole run. Provider and update errors are per-case and end up as
//! `Failed` entries in the run report; they never escalate.

use courtsync_state::StorageError;

/// The case snapshot could not be taken. Aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("case source unavailable: {reason}")]
pub struct SourceUnavailable {
    pub reason: String,
}

impl From<StorageError> for SourceUnavailable {
    fn from(err: StorageError) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

/// Failure fetching one case's status from the court source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network or timeout class fault; retried per policy.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Not-found or malformed-identifier class fault; never retried.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Failure applying a change set to a stored case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    /// Lost the optimistic-concurrency race twice.
    #[error("version conflict on case {case_id} after {attempts} attempts")]
    Conflict { case_id: String, attempts: u32 },

    /// The case vanished between snapshot and write.
    #[error("case {case_id} no longer exists")]
    CaseMissing { case_id: String },

    #[error("storage error: {0}")]
    Store(#[from] StorageError),
}

/// Invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid cron expression: {0}")]
    Cron(#[from] ScheduleError),
}

/// Cron expression parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("expected 6 fields (sec min hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("bad {field} field '{value}': {reason}")]
    BadField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("expression never fires")]
    NeverFires,
}

/// Top-level court sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("run cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for court sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
