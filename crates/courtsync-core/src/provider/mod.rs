//! Court status providers.
//!
//! [`CourtStatusProvider`] is the capability the sync run uses to reach the
//! external court source. The implementation is chosen at composition time:
//!
//! - [`MockProvider`]: deterministic, scriptable; used in tests and dry runs
//! - [`RemoteProvider`]: HTTP/JSON client for a court-status service
//!
//! [`fetch_with_retry`] wraps any provider with the per-attempt timeout and
//! exponential-backoff retry policy.

pub mod mock;
pub mod remote;
pub mod retry;

use async_trait::async_trait;

use crate::domain::{CnrLookup, CnrResolution, CourtStatusSnapshot, ProviderError};

pub use mock::{MockBehavior, MockProvider};
pub use remote::{RemoteProvider, RemoteProviderConfig};
pub use retry::{fetch_with_retry, FetchFailure, FetchSuccess, RetryPolicy};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Fetches authoritative case status from a court source.
#[async_trait]
pub trait CourtStatusProvider: Send + Sync {
    /// Short name for logs ("mock", "remote").
    fn name(&self) -> &str;

    /// Fetch the current status of the case identified by `cnr_number`.
    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot>;

    /// Resolve a CNR from a court's case number, year and court name.
    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution>;
}
