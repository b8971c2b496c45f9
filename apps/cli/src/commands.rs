//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contentflow_content::{Classifier, ExtractOptions, extract};
use contentflow_core::{
    CheckpointManager, OutcomeKind, ProgressReporter, RunCompletion, RunReport, TaskOutcome,
};
use contentflow_shared::{
    AppConfig, RunConfig, Task, WorkflowState, expand_home, init_config, load_config,
    load_config_from,
};
use contentflow_storage::{CheckpointStore, MemoryCheckpointStore, Storage};
use contentflow_store::{init_store, load_store, render_record};
use contentflow_tracker::{
    IssueTracker, JiraOptions, JiraTracker, MemoryTracker, RetryPolicy, RetryingTracker,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContentFlow: tracker tasks in, content store records out.
#[derive(Parser)]
#[command(
    name = "contentflow",
    version,
    about = "Ingest content tasks from an issue tracker into the content store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.contentflow/contentflow.toml).
    #[arg(long, global = true, env = "CONTENTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Perform one ingestion run.
    Run {
        /// Content store file (overrides store.path).
        #[arg(long)]
        store: Option<PathBuf>,

        /// Read tasks from a JSON file instead of the tracker (offline run).
        #[arg(long)]
        tasks_file: Option<PathBuf>,

        /// Overall run deadline in seconds, 0 for none (overrides run.timeout_secs).
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the content type a task summary classifies as.
    Classify {
        /// Task summary.
        summary: String,
    },

    /// Print the record a task would produce, without touching tracker or store.
    Preview {
        /// Task summary.
        #[arg(long)]
        summary: String,

        /// File holding the task description.
        #[arg(long)]
        description_file: PathBuf,

        /// Record key to render.
        #[arg(long, default_value = "PREVIEW-1")]
        key: String,
    },

    /// Content store maintenance.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Inspect or override the run checkpoint.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Store subcommands.
#[derive(Subcommand)]
pub(crate) enum StoreAction {
    /// Create an empty store file with the format header.
    Init {
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Parse the store and report its records.
    Check {
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

/// Checkpoint subcommands.
#[derive(Subcommand)]
pub(crate) enum CheckpointAction {
    /// Print the stored checkpoint.
    Show {
        /// List every entity's checkpoint in the database.
        #[arg(long)]
        all: bool,
    },
    /// Overwrite the checkpoint (RFC 3339 timestamp).
    Set { at: String },
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
        0 => "contentflow=info",
        1 => "contentflow=debug",
        _ => "contentflow=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init();
    }

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run {
            store,
            tasks_file,
            timeout_secs,
            json,
        } => cmd_run(&config, store, tasks_file.as_deref(), timeout_secs, json).await,
        Command::Classify { summary } => cmd_classify(&config, &summary),
        Command::Preview {
            summary,
            description_file,
            key,
        } => cmd_preview(&config, &summary, &description_file, &key),
        Command::Store { action } => match action {
            StoreAction::Init { store } => cmd_store_init(&store_path(&config, store)),
            StoreAction::Check { store } => cmd_store_check(&config, &store_path(&config, store)),
        },
        Command::Checkpoint { action } => match action {
            CheckpointAction::Show { all } => cmd_checkpoint_show(&config, all).await,
            CheckpointAction::Set { at } => cmd_checkpoint_set(&config, &at).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn store_path(config: &AppConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| expand_home(&config.store.path))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    store: Option<PathBuf>,
    tasks_file: Option<&Path>,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut run_config = RunConfig::from(config);
    if let Some(store) = store {
        run_config.store_path = store;
    }
    if let Some(secs) = timeout_secs {
        run_config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    let policy = RetryPolicy::from(&config.retry);

    // Offline runs read every task in the file and keep the checkpoint in memory.
    let (tracker, checkpoints): (Box<dyn IssueTracker>, Box<dyn CheckpointStore>) = match tasks_file
    {
        Some(path) => {
            info!(path = %path.display(), "offline run from tasks file");
            let tracker = RetryingTracker::new(MemoryTracker::from_json_file(path)?, policy);
            let checkpoints =
                MemoryCheckpointStore::with_checkpoint(&run_config.entity_id, DateTime::UNIX_EPOCH);
            (Box::new(tracker), Box::new(checkpoints))
        }
        None => {
            let jira = JiraTracker::new(JiraOptions::from_config(&config.tracker)?)?;
            let storage = Storage::open(&expand_home(&config.run.checkpoint_db)).await?;
            (Box::new(RetryingTracker::new(jira, policy)), Box::new(storage))
        }
    };

    let reporter = CliProgress::new();
    let report = contentflow_core::run(
        &run_config,
        tracker.as_ref(),
        checkpoints.as_ref(),
        &reporter,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }

    match &report.completion {
        RunCompletion::Completed => Ok(()),
        RunCompletion::TimedOut => Err(eyre!("run timed out; checkpoint not advanced")),
        RunCompletion::CheckpointNotSaved { error } => {
            Err(eyre!("run finished but the checkpoint was not saved: {error}"))
        }
    }
}

fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let status = match &report.completion {
        RunCompletion::Completed => "completed".to_string(),
        RunCompletion::TimedOut => "timed out".to_string(),
        RunCompletion::CheckpointNotSaved { error } => format!("checkpoint not saved ({error})"),
    };
    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;

    out.push('\n');
    out.push_str(&format!("  Run {}: {status}\n", report.run_id));
    out.push_str(&format!(
        "  Since: {}   Discovered: {}\n",
        report.checkpoint.to_rfc3339(),
        report.discovered
    ));
    out.push_str(&format!(
        "  Published: {}   Duplicates: {}   Failed: {}   Ignored: {}\n",
        report.counts.processed, report.counts.skipped, report.counts.failed, report.counts.ignored
    ));
    out.push_str(&format!("  Time: {elapsed:.1}s\n"));

    if !report.outcomes.is_empty() {
        out.push('\n');
    }
    for outcome in &report.outcomes {
        out.push_str(&format!(
            "  {:<14} {:<13} {}\n",
            outcome.key,
            outcome.content_type.to_string(),
            describe(&outcome.kind)
        ));
        for line in outcome.warnings.iter().chain(&outcome.anomalies) {
            out.push_str(&format!("      ! {line}\n"));
        }
    }
    out.push('\n');
    out
}

fn describe(kind: &OutcomeKind) -> String {
    match kind {
        OutcomeKind::Published => "published".into(),
        OutcomeKind::PublishedNotDone { reason } => format!("published, NOT marked done: {reason}"),
        OutcomeKind::SkippedDuplicate => "skipped: duplicate".into(),
        OutcomeKind::Ignored => "ignored".into(),
        OutcomeKind::Failed { error } => format!("FAILED: {error}"),
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn tasks_discovered(&self, total: usize) {
        self.spinner.set_message(format!("Discovered {total} task(s)"));
    }

    fn task_started(&self, key: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Processing [{current}/{total}] {key}"));
    }

    fn task_finished(&self, outcome: &TaskOutcome) {
        if matches!(
            outcome.kind,
            OutcomeKind::Failed { .. } | OutcomeKind::PublishedNotDone { .. }
        ) {
            self.spinner
                .println(format!("  {}: {}", outcome.key, describe(&outcome.kind)));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// classify / preview
// ---------------------------------------------------------------------------

fn cmd_classify(config: &AppConfig, summary: &str) -> Result<()> {
    let classifier = Classifier::new(&config.classifier.press_release_markers);
    println!("{}", classifier.classify(summary));
    Ok(())
}

fn cmd_preview(config: &AppConfig, summary: &str, description_file: &Path, key: &str) -> Result<()> {
    let description = std::fs::read_to_string(description_file)
        .map_err(|e| eyre!("cannot read {}: {e}", description_file.display()))?;
    let content_type =
        Classifier::new(&config.classifier.press_release_markers).classify(summary);

    if !content_type.is_publishable() {
        println!("{content_type}: task would be ignored, no record produced");
        return Ok(());
    }

    let task = Task {
        key: key.to_string(),
        summary: summary.to_string(),
        description,
        created_at: Utc::now(),
        status: WorkflowState::Backlog,
    };
    let opts = ExtractOptions {
        max_line_len: config.format.max_line_len,
        teaser_warn_len: config.format.teaser_warn_len,
        year: task.created_at.year(),
    };
    let extraction = extract(&task, content_type, &opts);

    for anomaly in &extraction.anomalies {
        eprintln!("warning: {anomaly}");
    }
    print!("{}", render_record(&extraction.record));
    Ok(())
}

// ---------------------------------------------------------------------------
// store
// ---------------------------------------------------------------------------

fn cmd_store_init(path: &Path) -> Result<()> {
    if init_store(path)? {
        println!("Content store created at: {}", path.display());
    } else {
        println!("Content store already exists at: {}", path.display());
    }
    Ok(())
}

fn cmd_store_check(config: &AppConfig, path: &Path) -> Result<()> {
    let store = load_store(path)?;
    let limit = config.format.max_line_len;

    let mut long_lines = 0;
    for stored in store.records() {
        for line in stored.record().body.iter().flat_map(|p| p.lines.iter()) {
            let len = line.chars().count();
            if len > limit {
                long_lines += 1;
                println!("  {}: body line of {len} characters (limit {limit})", stored.key());
            }
        }
    }

    println!("{}: {} record(s), valid", path.display(), store.len());
    if long_lines > 0 {
        println!("{long_lines} body line(s) exceed the line limit (single oversized words)");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// checkpoint
// ---------------------------------------------------------------------------

async fn cmd_checkpoint_show(config: &AppConfig, all: bool) -> Result<()> {
    let db_path = expand_home(&config.run.checkpoint_db);
    let entity = &config.run.entity_id;

    if !db_path.exists() {
        println!("No checkpoint database at {}", db_path.display());
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    if all {
        let checkpoints = storage.list_checkpoints().await?;
        if checkpoints.is_empty() {
            println!("No checkpoints stored in {}", db_path.display());
        }
        for (entity_id, at) in checkpoints {
            println!("{entity_id}: {}", at.to_rfc3339());
        }
        return Ok(());
    }

    match storage.load(entity).await? {
        Some(at) => println!("{entity}: {}", at.to_rfc3339()),
        None => println!(
            "{entity}: no checkpoint (next run looks back {} days)",
            config.run.initial_lookback_days
        ),
    }
    Ok(())
}

async fn cmd_checkpoint_set(config: &AppConfig, at: &str) -> Result<()> {
    let at = DateTime::parse_from_rfc3339(at)
        .map_err(|e| eyre!("invalid timestamp '{at}': {e}"))?
        .with_timezone(&Utc);

    let storage = Storage::open(&expand_home(&config.run.checkpoint_db)).await?;
    let manager = CheckpointManager::new(
        &storage,
        config.run.entity_id.as_str(),
        config.run.initial_lookback_days,
    );
    let previous = manager.stored().await?;
    manager.set(at).await?;

    match previous {
        Some(prev) => println!("Checkpoint moved from {} to {}", prev.to_rfc3339(), at.to_rfc3339()),
        None => println!("Checkpoint set to {}", at.to_rfc3339()),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
