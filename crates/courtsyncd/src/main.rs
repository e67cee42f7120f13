//! CourtSync daemon
//!
//! The `courtsyncd` binary runs the nightly reconciliation scheduler and
//! exposes a few operator commands against the configured court provider.
//!
//! ## Commands
//!
//! - `run`: start the scheduler and wait for Ctrl-C
//! - `trigger`: run one reconciliation pass now and print its report
//! - `status`: fetch the court status for one CNR
//! - `resolve-cnr`: look up a CNR from case number, year and court
//! - `next-runs`: preview upcoming scheduled fire times

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use courtsync_core::telemetry::init_tracing;
use courtsync_core::{
    AuditSink, CaseStore, CnrLookup, CourtStatusProvider, FanoutAuditSink, JsonFileAuditSink,
    MockProvider, ProviderKind, RemoteProvider, RunOutcome, Scheduler, Settings, SurrealCaseStore,
    SyncContext, SyncRunReport, TracingAuditSink, TriggerOutcome,
};
use tracing::{info, warn, Level};

/// Exit code for a run that finished with skipped cases or was aborted.
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "courtsyncd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Court case status reconciliation daemon", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "COURTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the scheduler and run until interrupted
    Run,

    /// Run one reconciliation pass immediately and print the report
    ///
    /// The run lock is per process: this does not exclude a separately
    /// running `courtsyncd run` daemon.
    Trigger,

    /// Fetch the current court status for a CNR
    Status {
        /// CNR number to look up
        cnr: String,
    },

    /// Resolve a CNR number from case details
    ResolveCnr {
        /// Case number, e.g. "TS/123"
        #[arg(long)]
        case_number: String,

        /// Filing year
        #[arg(long)]
        year: String,

        /// Court name
        #[arg(long)]
        court: String,
    },

    /// Show the next scheduled run times
    NextRuns {
        /// How many fire times to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => cmd_run(&settings).await.map(|_| ExitCode::SUCCESS),
        Commands::Trigger => cmd_trigger(&settings).await,
        Commands::Status { cnr } => cmd_status(&settings, &cnr).await.map(|_| ExitCode::SUCCESS),
        Commands::ResolveCnr {
            case_number,
            year,
            court,
        } => {
            let lookup = CnrLookup {
                case_number,
                year,
                court_name: court,
            };
            cmd_resolve_cnr(&settings, &lookup)
                .await
                .map(|_| ExitCode::SUCCESS)
        }
        Commands::NextRuns { count } => cmd_next_runs(&settings, count).map(|_| ExitCode::SUCCESS),
    }
}

fn build_provider(settings: &Settings) -> Result<Arc<dyn CourtStatusProvider>> {
    match settings.provider.kind {
        ProviderKind::Mock => Ok(Arc::new(MockProvider::new(Utc::now().date_naive()))),
        ProviderKind::Remote => {
            let config = settings
                .remote_provider()
                .context("provider.base_url is required for the remote provider")?;
            let provider =
                RemoteProvider::new(config).context("Failed to build remote court provider")?;
            Ok(Arc::new(provider))
        }
    }
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn CaseStore>> {
    let url = &settings.store.url;
    let store = match (&settings.store.username, &settings.store.password) {
        (Some(user), Some(pass)) => SurrealCaseStore::connect_with_root(url, user, pass).await,
        _ => SurrealCaseStore::connect(url).await,
    }
    .with_context(|| format!("Failed to connect to case store at {url}"))?;
    Ok(Arc::new(store))
}

fn build_audit(settings: &Settings) -> Arc<dyn AuditSink> {
    let mut fanout = FanoutAuditSink::new(vec![Arc::new(TracingAuditSink)]);
    if let Some(dir) = &settings.audit.report_dir {
        fanout.push(Arc::new(JsonFileAuditSink::new(dir.clone())));
    }
    Arc::new(fanout)
}

async fn build_scheduler(settings: &Settings) -> Result<Scheduler> {
    let provider = build_provider(settings)?;
    let store = connect_store(settings).await?;
    let config = settings
        .scheduler_config()
        .context("Invalid scheduler configuration")?;
    Ok(Scheduler::new(
        SyncContext::from_store(store, provider),
        config,
        build_audit(settings),
    ))
}

async fn cmd_run(settings: &Settings) -> Result<()> {
    let scheduler = build_scheduler(settings).await?;

    if scheduler.start() {
        if let Some(next) = scheduler.upcoming(1).first() {
            info!(next_run = %next, cron = %scheduler.schedule(), "scheduler started");
        }
    } else {
        warn!("scheduled sync is disabled; waiting for shutdown only");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("shutdown requested");
    scheduler.shutdown().await;
    info!("scheduler stopped");
    Ok(())
}

async fn cmd_trigger(settings: &Settings) -> Result<ExitCode> {
    let scheduler = build_scheduler(settings).await?;

    let report = match scheduler.trigger_manual().await {
        TriggerOutcome::Ran(report) => report,
        TriggerOutcome::Busy => {
            println!("A sync run is already in progress");
            return Ok(ExitCode::from(EXIT_INCOMPLETE));
        }
    };

    print_json(&report)?;
    Ok(ExitCode::from(exit_code_for(&report)))
}

fn exit_code_for(report: &SyncRunReport) -> u8 {
    match report.outcome() {
        RunOutcome::Completed => 0,
        RunOutcome::Partial | RunOutcome::Aborted => EXIT_INCOMPLETE,
    }
}

async fn cmd_status(settings: &Settings, cnr: &str) -> Result<()> {
    let provider = build_provider(settings)?;
    let snapshot = provider
        .fetch(cnr)
        .await
        .with_context(|| format!("Failed to fetch status for {cnr}"))?;
    print_json(&snapshot)
}

async fn cmd_resolve_cnr(settings: &Settings, lookup: &CnrLookup) -> Result<()> {
    let provider = build_provider(settings)?;
    let resolution = provider
        .resolve_cnr(lookup)
        .await
        .with_context(|| format!("Failed to resolve CNR for {}", lookup.case_number))?;
    print_json(&resolution)
}

fn cmd_next_runs(settings: &Settings, count: usize) -> Result<()> {
    let schedule = settings.schedule().context("Invalid cron expression")?;
    println!("Schedule: {schedule} (UTC)");
    for at in schedule.upcoming(Utc::now(), count) {
        println!("  {}", at.to_rfc3339());
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}
