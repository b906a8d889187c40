//! Healthboard CLI - dashboard snapshots from a health-data export
//!
//! Commands:
//! - today: Current-day snapshot with latest vitals
//! - day: Snapshot for a single historical day
//! - trends: Multi-day trend series
//! - widget: Compute the home-screen widget state
//! - sync: Run one differential sync against a stored changes token
//! - doctor: Diagnose platform, permissions and configuration

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use healthboard::dashboard::{load_day, HistoryLoader, SnapshotLoader, TodayLoader, TrendsLoader};
use healthboard::permissions::Permission;
use healthboard::stats::mean_of_present;
use healthboard::sync::FileTokenStore;
use healthboard::types::RecordKind;
use healthboard::widget::{MemoryWidgetStore, WidgetUpdate};
use healthboard::{
    Availability, ChangeTracker, DashboardConfig, HealthError, HealthRepository, HealthSession,
    LocalPlatform, WidgetMode, WidgetUpdater, HEALTHBOARD_VERSION, PRODUCER_NAME,
};

/// Healthboard - dashboard summaries over a permissioned health-data store
#[derive(Parser)]
#[command(name = "healthboard")]
#[command(version = HEALTHBOARD_VERSION)]
#[command(about = "Summarize health records into dashboard snapshots", long_about = None)]
struct Cli {
    /// Health-data export (JSON) to read records from
    #[arg(short, long, global = true, default_value = "export.json")]
    input: PathBuf,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when HEALTHBOARD_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Current-day snapshot
    Today,

    /// Snapshot for one day (defaults to yesterday)
    Day {
        /// Date to load (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Trend series over the last N days
    Trends {
        /// Period length in days
        #[arg(long)]
        days: Option<u32>,
    },

    /// Compute the widget state
    Widget {
        #[arg(long, value_enum, default_value = "simple-count")]
        mode: ModeArg,

        /// Run as an OS-triggered background update
        #[arg(long)]
        background: bool,
    },

    /// Differential sync against a persisted changes token
    Sync {
        /// Token file
        #[arg(long, default_value = "healthboard-tokens.json")]
        tokens: PathBuf,
    },

    /// Diagnose platform, permissions and configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Today's step count
    SimpleCount,
    /// Today's steps against the recent daily average
    Progress,
}

impl From<ModeArg> for WidgetMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SimpleCount => WidgetMode::SimpleCount,
            ModeArg::Progress => WidgetMode::ProgressVsAverage,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env("HEALTHBOARD_LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if let Commands::Doctor { json } = cli.command {
        return runtime.block_on(cmd_doctor(&cli.input, cli.config.as_deref(), json));
    }

    let config = DashboardConfig::load(cli.config.as_deref())?;
    let platform = load_platform(&cli.input)?;
    let session = Arc::new(HealthSession::new(Arc::new(platform)));

    runtime.block_on(async move {
        match cli.command {
            Commands::Today => {
                let repo = connect(&session, &config).await?;
                emit(&TodayLoader.load(&repo).await)
            }
            Commands::Day { date } => {
                let repo = connect(&session, &config).await?;
                let loader = HistoryLoader::new();
                if let Some(date) = date {
                    loader.set_date(date);
                }
                let date = loader.anchor(&repo);
                emit(&load_day(&repo, date).await)
            }
            Commands::Trends { days } => {
                let repo = connect(&session, &config).await?;
                let loader = TrendsLoader::new(days.unwrap_or(config.trend_days));
                emit(&loader.load(&repo).await)
            }
            Commands::Widget { mode, background } => {
                cmd_widget(session, config, mode.into(), background).await
            }
            Commands::Sync { tokens } => cmd_sync(&session, &config, tokens).await,
            Commands::Doctor { .. } => Ok(()),
        }
    })
}

fn load_platform(input: &Path) -> Result<LocalPlatform, CliFailure> {
    let content = fs::read_to_string(input)?;
    Ok(LocalPlatform::from_export_json(&content)?)
}

async fn connect(session: &HealthSession, config: &DashboardConfig) -> Result<HealthRepository, CliFailure> {
    let client = session.client().await?;
    Ok(HealthRepository::new(client, config.clone()))
}

/// Pretty JSON on a terminal, compact JSON when piped
fn emit<T: Serialize>(value: &T) -> Result<(), CliFailure> {
    let json = if atty::is(atty::Stream::Stdout) {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

async fn cmd_widget(
    session: Arc<HealthSession>,
    config: DashboardConfig,
    mode: WidgetMode,
    background: bool,
) -> Result<(), CliFailure> {
    let updater = WidgetUpdater::new(
        Arc::clone(&session),
        config.clone(),
        Arc::new(MemoryWidgetStore::new()),
        mode,
    );

    if background {
        return emit(&updater.background_update().await);
    }

    let repo = connect(&session, &config).await?;
    let today = repo.today();
    let days = config.widget_average_days;
    let first = today - chrono::Duration::days(i64::from(days));
    let steps = repo.steps_for_day(today).await?;
    let average = mean_of_present(&repo.daily_steps(first, days).await?);
    let state = updater.push_from_foreground(steps.total, average);
    emit(&WidgetUpdate::Updated { state })
}

#[derive(Serialize)]
struct SyncReport {
    key: String,
    outcome: healthboard::SyncOutcome,
    reload: bool,
}

async fn cmd_sync(
    session: &HealthSession,
    config: &DashboardConfig,
    tokens: PathBuf,
) -> Result<(), CliFailure> {
    let client = session.client().await?;
    let tracker = ChangeTracker::new(
        client,
        Arc::new(FileTokenStore::new(tokens)),
        &RecordKind::ALL,
        config.token_ttl(),
    );
    let outcome = tracker.refresh().await;
    emit(&SyncReport {
        key: tracker.key(),
        reload: outcome.needs_reload(),
        outcome,
    })
}

async fn cmd_doctor(input: &Path, config_path: Option<&Path>, json: bool) -> Result<(), CliFailure> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok("version", format!("Healthboard version {}", HEALTHBOARD_VERSION)));

    match DashboardConfig::load(config_path) {
        Ok(config) => checks.push(DoctorCheck::ok(
            "config",
            format!(
                "Refresh every {}s, UTC offset {} min, {} preferred step sources",
                config.refresh_interval_secs,
                config.utc_offset_minutes,
                config.preferred_step_sources.sources().len()
            ),
        )),
        Err(e) => checks.push(DoctorCheck::error("config", e.to_string())),
    }

    match load_platform(input) {
        Ok(platform) => {
            let records = platform.store().record_count();
            let session = HealthSession::new(Arc::new(platform));
            checks.extend(platform_checks(&session, records).await);
        }
        Err(e) => checks.push(DoctorCheck::error("export", CliError::from(e).message)),
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        DoctorCheck::ok("stdout", "stdout is a TTY (pretty JSON output)")
    } else {
        DoctorCheck::ok("stdout", "stdout is a pipe (compact JSON output)")
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: HEALTHBOARD_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Healthboard Doctor Report");
        println!("=========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliFailure::DoctorFailed)
    } else {
        Ok(())
    }
}

async fn platform_checks(session: &HealthSession, records: usize) -> Vec<DoctorCheck> {
    let status = session.availability();
    if status != Availability::Available {
        return vec![DoctorCheck::error("platform", format!("Health platform {}", status))];
    }

    let mut checks = vec![DoctorCheck::ok(
        "platform",
        format!("Health platform available ({} records)", records),
    )];

    match session.missing_permissions().await {
        Ok(missing) if missing.is_empty() => {
            checks.push(DoctorCheck::ok("permissions", "All read permissions granted"));
        }
        Ok(missing) => {
            let names: Vec<String> = missing.iter().map(Permission::to_string).collect();
            checks.push(DoctorCheck::warning(
                "permissions",
                format!("Missing {} (affected metrics show as no permission)", names.join(", ")),
            ));
        }
        Err(e) => checks.push(DoctorCheck::error("permissions", e.to_string())),
    }

    match session.has_background_permission().await {
        Ok(true) => checks.push(DoctorCheck::ok("background", "Background read granted")),
        Ok(false) => checks.push(DoctorCheck::warning(
            "background",
            "Background read not granted; widget keeps its last foreground values",
        )),
        Err(e) => checks.push(DoctorCheck::error("background", e.to_string())),
    }

    checks
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
        }
    }

    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, message)
    }

    fn warning(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warning, message)
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, message)
    }
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Io(io::Error),
    Health(HealthError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<io::Error> for CliFailure {
    fn from(e: io::Error) -> Self {
        CliFailure::Io(e)
    }
}

impl From<HealthError> for CliFailure {
    fn from(e: HealthError) -> Self {
        CliFailure::Health(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the --input path and file permissions".to_string()),
            },
            CliFailure::Health(HealthError::Unavailable(status)) => CliError {
                code: "PLATFORM_UNAVAILABLE".to_string(),
                message: format!("Health platform {}", status),
                hint: Some("Install or update the health-data provider".to_string()),
            },
            CliFailure::Health(e @ HealthError::PermissionDenied(_)) => CliError {
                code: "PERMISSION_DENIED".to_string(),
                message: e.to_string(),
                hint: Some("Grant the read permission in the export's \"granted\" list".to_string()),
            },
            CliFailure::Health(e @ HealthError::Config(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the --config file and HEALTHBOARD_* variables".to_string()),
            },
            CliFailure::Health(e) => CliError {
                code: "HEALTH_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CliFailure::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more checks failed".to_string(),
                hint: None,
            },
        }
    }
}
