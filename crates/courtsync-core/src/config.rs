//! Configuration loading.
//!
//! Settings come from a TOML file, then `COURTSYNC_*` environment overrides,
//! then [`Settings::validate`]. Every key has a default, so an empty file (or
//! no file) is a valid mock-provider, in-memory-store configuration.
//!
//! ```toml
//! [sync]
//! enabled = true
//! cron = "0 0 2 * * ?"
//! concurrency = 5
//! per_case_timeout_ms = 10000
//! grace_period_ms = 5000
//!
//! [sync.retry]
//! max_attempts = 2
//! backoff_base_ms = 500
//!
//! [provider]
//! kind = "remote"
//! base_url = "https://court.example/api"
//!
//! [store]
//! url = "surrealkv://./data/courtsync"
//!
//! [audit]
//! report_dir = "./reports"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::provider::{RemoteProviderConfig, RetryPolicy};
use crate::run::SyncRunConfig;
use crate::schedule::CronSchedule;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_CRON: &str = "0 0 2 * * ?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// When false the scheduler never fires; manual triggers still work.
    pub enabled: bool,
    /// Six-field cron expression, evaluated in UTC.
    pub cron: String,
    pub concurrency: usize,
    pub per_case_timeout_ms: u64,
    pub retry: RetrySettings,
    pub run_timeout_secs: Option<u64>,
    pub grace_period_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: DEFAULT_CRON.to_string(),
            concurrency: 5,
            per_case_timeout_ms: 10_000,
            retry: RetrySettings::default(),
            run_timeout_secs: None,
            grace_period_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Mock,
    Remote,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(ProviderKind::Mock),
            "remote" => Ok(ProviderKind::Remote),
            other => Err(ConfigError::Invalid(format!(
                "provider.kind must be 'mock' or 'remote', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SurrealDB endpoint: `mem://`, `surrealkv://path`, `ws://host:port`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "mem://".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Directory for `sync-run-{run_id}.json` files.
    pub report_dir: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncSettings,
    pub provider: ProviderSettings,
    pub store: StoreSettings,
    pub audit: AuditSettings,
}

impl Settings {
    /// Parse TOML text. Does not apply env overrides or validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path` (or defaults when `None`), apply process env overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `COURTSYNC_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COURTSYNC_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("COURTSYNC_SYNC_ENABLED", &v)?;
        }
        if let Some(v) = lookup("COURTSYNC_SYNC_CRON") {
            self.sync.cron = v;
        }
        if let Some(v) = lookup("COURTSYNC_SYNC_CONCURRENCY") {
            self.sync.concurrency = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("COURTSYNC_SYNC_CONCURRENCY: '{v}' is not a number"))
            })?;
        }
        if let Some(v) = lookup("COURTSYNC_PROVIDER_KIND") {
            self.provider.kind = v.parse()?;
        }
        if let Some(v) = lookup("COURTSYNC_PROVIDER_URL") {
            self.provider.base_url = Some(v);
        }
        if let Some(v) = lookup("COURTSYNC_PROVIDER_TOKEN") {
            self.provider.token = Some(v);
        }
        if let Some(v) = lookup("COURTSYNC_STORE_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("COURTSYNC_REPORT_DIR") {
            self.audit.report_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "sync.concurrency must be at least 1".into(),
            ));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.sync.per_case_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.per_case_timeout_ms must be positive".into(),
            ));
        }
        if self.sync.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "sync.run_timeout_secs must be positive when set".into(),
            ));
        }
        self.schedule()?;
        if self.provider.kind == ProviderKind::Remote
            && self
                .provider
                .base_url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "provider.base_url is required when provider.kind = \"remote\"".into(),
            ));
        }
        if self.store.url.trim().is_empty() {
            return Err(ConfigError::Invalid("store.url must not be empty".into()));
        }
        Ok(())
    }

    pub fn schedule(&self) -> Result<CronSchedule, ConfigError> {
        Ok(CronSchedule::parse(&self.sync.cron)?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.retry.max_attempts,
            backoff_base: Duration::from_millis(self.sync.retry.backoff_base_ms),
            per_attempt_timeout: Duration::from_millis(self.sync.per_case_timeout_ms),
        }
    }

    pub fn run_config(&self) -> SyncRunConfig {
        SyncRunConfig {
            concurrency: self.sync.concurrency,
            retry: self.retry_policy(),
            run_timeout: self.sync.run_timeout_secs.map(Duration::from_secs),
            grace_period: Duration::from_millis(self.sync.grace_period_ms),
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(SchedulerConfig {
            enabled: self.sync.enabled,
            schedule: self.schedule()?,
            run: self.run_config(),
        })
    }

    /// Remote provider settings, if the remote provider is selected.
    pub fn remote_provider(&self) -> Option<RemoteProviderConfig> {
        if self.provider.kind != ProviderKind::Remote {
            return None;
        }
        let base_url = self.provider.base_url.clone()?;
        let mut config = RemoteProviderConfig::new(base_url)
            .with_request_timeout(Duration::from_millis(self.sync.per_case_timeout_ms));
        if let Some(token) = &self.provider.token {
            config = config.with_token(token.clone());
        }
        Some(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{key}: '{other}' is not a boolean"
        ))),
    }
}
