//! Source of sync-eligible cases.

use std::sync::Arc;

use async_trait::async_trait;
use courtsync_state::{CaseRecord, CaseStore};
use tracing::debug;

use crate::domain::SourceUnavailable;

/// Yields the set of cases a run should reconcile.
#[async_trait]
pub trait CaseSource: Send + Sync {
    /// Snapshot of all sync-eligible cases at call time. Records are owned
    /// copies; later writes do not alter them.
    async fn list_eligible_cases(&self) -> Result<Vec<CaseRecord>, SourceUnavailable>;
}

/// [`CaseSource`] over any [`CaseStore`].
#[derive(Clone)]
pub struct StoreCaseSource {
    store: Arc<dyn CaseStore>,
}

impl StoreCaseSource {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CaseSource for StoreCaseSource {
    async fn list_eligible_cases(&self) -> Result<Vec<CaseRecord>, SourceUnavailable> {
        let mut cases = self.store.list_sync_eligible().await?;
        let listed = cases.len();
        // Stores filter server-side; re-check so a lax backend cannot leak
        // closed or CNR-less cases into a run.
        cases.retain(CaseRecord::is_sync_eligible);
        if cases.len() != listed {
            debug!(
                dropped = listed - cases.len(),
                "store returned ineligible cases"
            );
        }
        Ok(cases)
    }
}
