//! Case record schema
//!
//! `CaseRecord` is the persisted shape of a legal case as far as court-status
//! reconciliation is concerned. The persistence layer owns it; the sync engine
//! only reads it and writes it back through [`crate::CaseStore::write_if_version`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        CaseId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CaseId {
    fn from(s: &str) -> Self {
        CaseId(s.to_string())
    }
}

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Active,
    Closed,
    Disposed,
    Archived,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Active => "ACTIVE",
            CaseStatus::Closed => "CLOSED",
            CaseStatus::Disposed => "DISPOSED",
            CaseStatus::Archived => "ARCHIVED",
        }
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    /// Court-assigned case number, unique across the register.
    pub case_number: String,
    /// CNR (court-issued unique identifier), used to query court status.
    pub cnr_number: Option<String>,
    pub case_title: String,
    pub court_name: String,
    /// Free-text procedural stage, e.g. "Arguments Stage".
    pub stage: Option<String>,
    pub next_hearing_date: Option<NaiveDate>,
    pub status: CaseStatus,
    /// Bumped by exactly one on every successful conditional write.
    pub sync_version: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CaseRecord {
    /// Create a fresh, never-synced active case.
    pub fn new(
        id: impl Into<String>,
        case_number: impl Into<String>,
        cnr_number: Option<String>,
    ) -> Self {
        Self {
            id: CaseId(id.into()),
            case_number: case_number.into(),
            cnr_number,
            case_title: String::new(),
            court_name: String::new(),
            stage: None,
            next_hearing_date: None,
            status: CaseStatus::Active,
            sync_version: 0,
            last_synced_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.case_title = title.into();
        self
    }

    pub fn with_court(mut self, court: impl Into<String>) -> Self {
        self.court_name = court.into();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_next_hearing(mut self, date: NaiveDate) -> Self {
        self.next_hearing_date = Some(date);
        self
    }

    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = status;
        self
    }

    /// A case takes part in court sync iff it is active and has a usable CNR.
    pub fn is_sync_eligible(&self) -> bool {
        self.status == CaseStatus::Active
            && self
                .cnr_number
                .as_deref()
                .is_some_and(|cnr| !cnr.trim().is_empty())
    }
}

/// Field values to write in a conditional update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasePatch {
    pub stage: Option<String>,
    pub next_hearing_date: Option<NaiveDate>,
}

impl CasePatch {
    pub fn is_empty(&self) -> bool {
        self.stage.is_none() && self.next_hearing_date.is_none()
    }

    /// Apply the patch to an in-memory record (used by fakes and by callers
    /// that want to mirror a successful write locally).
    pub fn apply_to(&self, record: &mut CaseRecord) {
        if let Some(stage) = &self.stage {
            record.stage = Some(stage.clone());
        }
        if let Some(date) = self.next_hearing_date {
            record.next_hearing_date = Some(date);
        }
    }
}
