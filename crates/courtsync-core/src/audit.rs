//! Destinations for finalized run reports.
//!
//! A sink failure is logged by the caller and never alters the report.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::report::SyncRunReport;

/// Receives every finalized [`SyncRunReport`].
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, report: &SyncRunReport) -> Result<()>;
}

/// Logs one structured line per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn record(&self, report: &SyncRunReport) -> Result<()> {
        let failed: Vec<&str> = report
            .failed_cases()
            .iter()
            .map(|f| f.case_id.as_str())
            .collect();
        info!(
            event = "audit.report",
            run_id = %report.run_id(),
            trigger = %report.trigger(),
            outcome = %report.outcome(),
            candidates = report.total_candidates() as u64,
            updated = report.updated_count() as u64,
            unchanged = report.unchanged_count() as u64,
            failed = ?failed,
            skipped = report.skipped_cases().len() as u64,
            abort_reason = report.abort_reason().unwrap_or(""),
        );
        Ok(())
    }
}

/// Writes `sync-run-{run_id}.json` (pretty JSON) into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileAuditSink {
    dir: PathBuf,
}

impl JsonFileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, report: &SyncRunReport) -> PathBuf {
        self.dir.join(format!("sync-run-{}.json", report.run_id()))
    }
}

#[async_trait]
impl AuditSink for JsonFileAuditSink {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn record(&self, report: &SyncRunReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create report dir {:?}", self.dir))?;
        let path = self.path_for(report);
        let content = serde_json::to_string_pretty(report).context("serialize run report")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("write {:?}", path))?;
        Ok(())
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    reports: Arc<Mutex<Vec<SyncRunReport>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SyncRunReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, report: &SyncRunReport) -> Result<()> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }
}

/// Forwards each report to every inner sink. One sink failing does not stop
/// the others; all failures come back as one error naming each failed sink.
/// Logging is left to the caller.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn record(&self, report: &SyncRunReport) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.record(report).await {
                failures.push(format!("{}: {e:#}", sink.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(failures.join("; ")))
        }
    }
}
