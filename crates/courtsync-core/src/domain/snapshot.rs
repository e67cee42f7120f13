//! Court status as reported by the external source.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One case's status as fetched from the court source. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourtStatusSnapshot {
    pub cnr_number: String,
    pub next_hearing_date: Option<NaiveDate>,
    pub stage: Option<String>,
    pub last_order_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CourtStatusSnapshot {
    pub fn new(cnr_number: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            cnr_number: cnr_number.into(),
            next_hearing_date: None,
            stage: None,
            last_order_url: None,
            fetched_at,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_next_hearing(mut self, date: NaiveDate) -> Self {
        self.next_hearing_date = Some(date);
        self
    }

    pub fn with_order_url(mut self, url: impl Into<String>) -> Self {
        self.last_order_url = Some(url.into());
        self
    }
}

/// Lookup key for resolving a CNR from a court's own case numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnrLookup {
    pub case_number: String,
    pub year: String,
    pub court_name: String,
}

/// Result of a CNR lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnrResolution {
    pub cnr_number: String,
    pub case_number: String,
    pub court_name: String,
}
