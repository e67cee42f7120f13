//! HTTP/JSON court status client.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET  {base}/cases/{cnr}/status` -> [`StatusDto`]
//! - `POST {base}/cnr/lookup`         -> [`ResolutionDto`]
//!
//! Status codes are classified so the retry policy can act on them:
//! 404, 400 and 422 are permanent; 408, 429 and 5xx are transient, as are
//! connection failures and timeouts. A body that does not decode is permanent.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CourtStatusProvider, ProviderResult};
use crate::domain::{CnrLookup, CnrResolution, CourtStatusSnapshot, ProviderError};

/// Connection settings for [`RemoteProvider`].
#[derive(Debug, Clone)]
pub struct RemoteProviderConfig {
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl RemoteProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Wire shape of a status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDto {
    pub cnr_number: String,
    #[serde(default)]
    pub next_hearing_date: Option<NaiveDate>,
    #[serde(default)]
    pub case_stage: Option<String>,
    #[serde(default)]
    pub last_order_url: Option<String>,
}

/// Wire shape of a CNR lookup response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionDto {
    pub cnr_number: String,
}

/// Court status provider backed by an HTTP service.
pub struct RemoteProvider {
    config: RemoteProviderConfig,
    http_client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(config: RemoteProviderConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("courtsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("failed to build http client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn status_url(&self, cnr_number: &str) -> String {
        self.url(&format!("/cases/{}/status", urlencoding::encode(cnr_number)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> ProviderResult<reqwest::Response> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, what, body.trim()))
    }
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn classify_status(status: StatusCode, what: &str, body: &str) -> ProviderError {
    let detail = if body.is_empty() {
        format!("{what}: HTTP {status}")
    } else {
        format!("{what}: HTTP {status}: {body}")
    };
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Transient(detail)
        }
        s if s.is_server_error() => ProviderError::Transient(detail),
        _ => ProviderError::Permanent(detail),
    }
}

#[async_trait]
impl CourtStatusProvider for RemoteProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fetch(&self, cnr_number: &str) -> ProviderResult<CourtStatusSnapshot> {
        if cnr_number.trim().is_empty() {
            return Err(ProviderError::Permanent("empty CNR".to_string()));
        }
        let url = self.status_url(cnr_number);
        debug!(cnr = %cnr_number, url = %url, "fetching court status");

        let response = self
            .send(self.http_client.get(&url), &format!("status of {cnr_number}"))
            .await?;
        let dto: StatusDto = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed status body: {e}")))?;

        Ok(CourtStatusSnapshot {
            cnr_number: cnr_number.to_string(),
            next_hearing_date: dto.next_hearing_date,
            stage: dto.case_stage.filter(|s| !s.trim().is_empty()),
            last_order_url: dto.last_order_url,
            fetched_at: Utc::now(),
        })
    }

    async fn resolve_cnr(&self, lookup: &CnrLookup) -> ProviderResult<CnrResolution> {
        let url = self.url("/cnr/lookup");
        let response = self
            .send(
                self.http_client.post(&url).json(lookup),
                &format!("CNR lookup for {}", lookup.case_number),
            )
            .await?;
        let dto: ResolutionDto = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed lookup body: {e}")))?;

        Ok(CnrResolution {
            cnr_number: dto.cnr_number,
            case_number: lookup.case_number.clone(),
            court_name: lookup.court_name.clone(),
        })
    }
}
