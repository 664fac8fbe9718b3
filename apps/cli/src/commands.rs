//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use boardsync_core::{DailyJob, JobReport, ProgressReporter, Stage};
use boardsync_shared::{
    AppConfig, BoardSyncError, TranslateConfig, init_config, load_config, load_config_from,
    resolve_db_path, validate_source,
};
use boardsync_storage::Storage;
use boardsync_translate::{GoogleTranslator, Translate};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// boardsync - mirror a university notice board and merge event proposals.
#[derive(Parser)]
#[command(
    name = "boardsync",
    version,
    about = "Crawl, translate, and reconcile notice-board posts; merge calendar event proposals.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.boardsync/boardsync.toml).
    #[arg(long, global = true, env = "BOARDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `storage.db_path`.
    #[arg(long, global = true, env = "BOARDSYNC_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the daily job: crawl, translate, reconcile, merge.
    Run,

    /// Ingest today's notices from the listing page.
    Crawl,

    /// Translate stored notices into one language.
    Translate {
        /// Target language code (e.g. en, zh).
        #[arg(long)]
        lang: String,
    },

    /// Remove notices whose source page is gone.
    Reconcile,

    /// Promote event proposals that reached quorum.
    Merge,

    /// Show recent stage runs.
    Status {
        /// Number of runs to show.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "boardsync=info",
        1 => "boardsync=debug",
        _ => "boardsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run => cmd_run(&config, cli.db.as_deref()).await,
        Command::Crawl => cmd_stage(&config, cli.db.as_deref(), Stage::Crawl).await,
        Command::Translate { lang } => {
            cmd_stage(&config, cli.db.as_deref(), Stage::Translate(lang)).await
        }
        Command::Reconcile => cmd_stage(&config, cli.db.as_deref(), Stage::Reconcile).await,
        Command::Merge => cmd_stage(&config, cli.db.as_deref(), Stage::Merge).await,
        Command::Status { limit } => cmd_status(&config, cli.db.as_deref(), limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn db_path(config: &AppConfig, override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(resolve_db_path(config)?),
    }
}

/// Build the job. A missing API key only disables the translation stages.
fn build_job(config: &AppConfig) -> Result<DailyJob> {
    validate_source(config)?;

    let translate: Option<Arc<dyn Translate>> =
        match GoogleTranslator::from_config(&TranslateConfig::from(config)) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "translation disabled");
                None
            }
        };

    Ok(DailyJob::new(config, translate)?)
}

async fn cmd_run(config: &AppConfig, db: Option<&Path>) -> Result<()> {
    let job = build_job(config)?;
    let path = db_path(config, db)?;
    let storage = Storage::open(&path).await?;

    info!(db = %path.display(), "starting daily job");

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current stage");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let reporter = CliProgress::new();
    let report = job.run(&storage, &storage, &reporter, &cancel).await;
    print_report(&report);

    if report.interrupted {
        return Err(eyre!("daily job interrupted"));
    }
    if !report.aborted.is_empty() {
        let stages: Vec<&str> = report.aborted.iter().map(|(s, _)| s.as_str()).collect();
        return Err(eyre!("stages aborted: {}", stages.join(", ")));
    }
    Ok(())
}

async fn cmd_stage(config: &AppConfig, db: Option<&Path>, stage: Stage) -> Result<()> {
    let job = build_job(config)?;
    let path = db_path(config, db)?;
    let storage = Storage::open(&path).await?;

    let reporter = CliProgress::new();
    reporter.stage_started(&stage);
    match job.run_stage(&stage, &storage, &storage).await {
        Ok(summary) => {
            reporter.stage_finished(&stage, &summary.summary);
            reporter.spinner.finish_and_clear();
            println!("  {stage}: {}", summary.summary);
            print_failures(&summary.stats);
            Ok(())
        }
        Err(e) => {
            reporter.stage_failed(&stage, &e);
            reporter.spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

async fn cmd_status(config: &AppConfig, db: Option<&Path>, limit: u32) -> Result<()> {
    let path = db_path(config, db)?;
    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.recent_job_runs(limit).await?;

    if runs.is_empty() {
        println!("No stage runs recorded in {}", path.display());
        return Ok(());
    }

    println!();
    for (stage, started_at, stats) in runs {
        let stats = stats.unwrap_or_else(|| "(running or interrupted)".to_string());
        println!("  {started_at}  {stage:<14} {stats}");
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_report(report: &JobReport) {
    println!();
    for stage in &report.completed {
        println!("  {:<14} {}", stage.stage.to_string(), stage.summary);
    }
    for (stage, error) in &report.aborted {
        println!("  {stage:<14} aborted: {error}");
    }
    if report.interrupted {
        println!("  interrupted before all stages ran");
    }
    println!("  Time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

/// Print the `(subject, message)` pairs a stage reported, if any.
fn print_failures(stats: &serde_json::Value) {
    let list = stats
        .get("failures")
        .or_else(|| stats.get("errors"))
        .and_then(|v| v.as_array());
    let Some(list) = list else { return };

    for entry in list {
        if let Some([subject, message]) = entry.as_array().map(Vec::as_slice) {
            println!(
                "    {}: {}",
                subject.as_str().unwrap_or_default(),
                message.as_str().unwrap_or_default()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: &Stage) {
        self.spinner.set_message(format!("Running {stage}"));
    }

    fn stage_finished(&self, stage: &Stage, summary: &str) {
        self.spinner.println(format!("  ✓ {stage}: {summary}"));
    }

    fn stage_failed(&self, stage: &Stage, error: &BoardSyncError) {
        self.spinner.println(format!("  ✗ {stage}: {error}"));
    }

    fn done(&self, _report: &JobReport) {
        self.spinner.finish_and_clear();
    }
}
