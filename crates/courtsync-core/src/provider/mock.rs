//! Deterministic, scriptable court status provider.
//!
//! Unscripted CNRs get the stand-in answer the court integration has always
//! returned: stage "Arguments Stage", next hearing 30 days after the reference
//! date, and an order URL derived from the CNR. Tests script individual CNRs
//! with fixed statuses, failures, or delays.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};

use super::{CourtStatusProvider, ProviderResult};
use crate::domain::{CnrLookup, CnrResolution, CourtStatusSnapshot, ProviderError};

/// Stage reported for unscripted CNRs.
pub const DEFAULT_STAGE: &str = "Arguments Stage";

/// Days between the reference date and the reported next hearing.
pub const DEFAULT_HEARING_OFFSET_DAYS: u64 = 30;

/// Court code prefix used when resolving CNRs.
pub const CNR_PREFIX: &str = "BIHC01";

/// How the mock answers fetches for one CNR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Return the scripted status (or the default one).
    Respond,
    /// Fail every call with a permanent error.
    Permanent(String),
    /// Fail every call with a transient error.
    AlwaysTransient,
    /// Fail the first `n` calls transiently, then respond normally.
    TransientTimes(u32),
}

#[derive(Debug, Clone, Default)]
struct ScriptedStatus {
    stage: Option<String>,
    next_hearing_date: Option<NaiveDate>,
    last_order_url: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    statuses: HashMap<String, ScriptedStatus>,
    behaviors: HashMap<String, MockBehavior>,
    delays: HashMap<String, Duration>,
    calls: HashMap<String, u32>,
}

/// Scriptable in-process provider.
#[derive(Debug)]
pub struct MockProvider {
    reference_date: NaiveDate,
    fetched_at: Option<DateTime<Utc>>,
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Create a mock whose default hearing dates are relative to `reference_date`.
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            fetched_at: None,
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp every snapshot with a fixed fetch time instead of `Utc::now()`.
    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(at);
        self
    }

    /// Script the status returned for `cnr`. `None` fields are reported as unknown.
    pub fn with_status(
        self,
        cnr: &str,
        stage: Option<&str>,
        next_hearing_date: Option<NaiveDate>,
    ) -> Self {
        self.set_status(cnr, stage, next_hearing_date);
        self
    }

    pub fn with_behavior(self, cnr: &str, behavior: MockBehavior) -> Self {
        self.set_behavior(cnr, behavior);
        self
    }

    /// Delay every fetch for `cnr` by `delay` before answering.
    pub fn with_delay(self, cnr: &str, delay: Duration) -> Self {
        self.lock().delays.insert(cnr.to_string(), delay);
        self
    }

    /// Change the scripted status of `cnr` after construction.
    pub fn set_status(&self, cnr: &str, stage: Option<&str>, next_hearing_date: Option<NaiveDate>) {
        self.lock().statuses.insert(
            cnr.to_string(),
            ScriptedStatus {
                stage: stage.map(str::to_string),
                next_hearing_date,
                last_order_url: None,
            },
        );
    }

    pub fn set_behavior(&self, cnr: &str, behavior: MockBehavior) {
        self.lock().behaviors.insert(cnr.to_string(), behavior);
    }

    /// Number of fetches made for `cnr`.
    pub fn calls(&self, cnr: &str) -> u32 {
        self.lock().calls.get(cnr).copied().unwrap_or(0)
    }

    /// Total fetches across all CNRs.
    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    fn default_status(&self, cnr: &str) -> ScriptedStatus {
        ScriptedStatus {
            stage: Some(DEFAULT_STAGE.to_string()),
            next_hearing_date: self
                .reference_date
                .checked_add_days(Days::new(DEFAULT_HEARING_OFFSET_DAYS)),
            last_order_url: Some(format!("https://example.com/orders/{cnr}.pdf")),
        }
    }

    /// Record the call and decide the answer while holding the lock once.
    fn plan(&self, cnr: &str) -> (Option<Duration>, ProviderResult<ScriptedStatus>) {
        let mut state = self.lock();
        let call_no = {
            let n = state.calls.entry(cnr.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let delay = state.delays.get(cnr).copied();
        let behavior = state
            .behaviors
            .get(cnr)
            .cloned()
            .unwrap_or(MockBehavior::Respond);

        let answer = match behavior {
            MockBehavior::Permanent(reason) => Err(ProviderError::Permanent(reason)),
            MockBehavior::AlwaysTransient => Err(ProviderError::Transient(format!(
                "court service unreachable for {cnr}"
            ))),
            MockBehavior::TransientTimes(n) if call_no <= n => Err(ProviderError::Transient(
                format!("court service busy (call {call_no})"),
            )),
            MockBehavior::TransientTimes(_) | MockBehavior::Respond => Ok(state
                .statuses
                .get(cnr)
                .cloned()
                .unwrap_or_else(|| self.default_status(cnr))),
        };
        (delay, answer)
    }
}

#[async_trait]
impl CourtStatusProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot> {
        let (delay, answer) = self.plan(cnr_number);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let status = answer?;
        Ok(CourtStatusSnapshot {
            cnr_number: cnr_number.to_string(),
            next_hearing_date: status.next_hearing_date,
            stage: status.stage,
            last_order_url: status.last_order_url,
            fetched_at: self.fetched_at.unwrap_or_else(Utc::now),
        })
    }

    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution> {
        if lookup.case_number.trim().is_empty() || lookup.year.trim().is_empty() {
            return Err(ProviderError::Permanent(
                "case number and year are required".to_string(),
            ));
        }
        Ok(CnrResolution {
            cnr_number: format!(
                "{CNR_PREFIX}-{}-{}",
                lookup.case_number.replace('/', "-"),
                lookup.year
            ),
            case_number: lookup.case_number.clone(),
            court_name: lookup.court_name.clone(),
        })
    }
}
