//! Application configuration for ContentFlow.
//!
//! User config lives at `~/.contentflow/contentflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ContentFlowError, Result};
use crate::types::WorkflowState;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contentflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contentflow";

// ---------------------------------------------------------------------------
// Config structs (matching contentflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Issue-tracker connection settings.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Task classification rules.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Content store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry policy for transient tracker failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Run-level settings.
    #[serde(default)]
    pub run: RunSection,

    /// Output formatting limits.
    #[serde(default)]
    pub format: FormatConfig,
}

/// `[tracker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the tracker's REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Project whose tasks are ingested.
    #[serde(default = "default_project")]
    pub project: String,

    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tracker status names for each workflow state.
    #[serde(default)]
    pub statuses: StatusNames,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project: default_project(),
            api_token_env: default_api_token_env(),
            request_timeout_secs: default_request_timeout(),
            statuses: StatusNames::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://tracker.example.com".into()
}
fn default_project() -> String {
    "CONTENT".into()
}
fn default_api_token_env() -> String {
    "CONTENTFLOW_TRACKER_TOKEN".into()
}
fn default_request_timeout() -> u64 {
    30
}

/// `[tracker.statuses]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusNames {
    #[serde(default = "default_backlog")]
    pub backlog: String,
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_in_progress")]
    pub in_progress: String,
    #[serde(default = "default_done")]
    pub done: String,
}

impl Default for StatusNames {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            open: default_open(),
            in_progress: default_in_progress(),
            done: default_done(),
        }
    }
}

fn default_backlog() -> String {
    "Backlog".into()
}
fn default_open() -> String {
    "Open".into()
}
fn default_in_progress() -> String {
    "In Progress".into()
}
fn default_done() -> String {
    "Done".into()
}

impl StatusNames {
    /// Tracker-side name for a workflow state.
    pub fn name_of(&self, state: WorkflowState) -> &str {
        match state {
            WorkflowState::Backlog => &self.backlog,
            WorkflowState::Open => &self.open,
            WorkflowState::InProgress => &self.in_progress,
            WorkflowState::Done => &self.done,
        }
    }

    /// Map a tracker status name back to a workflow state (case-insensitive).
    pub fn state_of(&self, name: &str) -> Option<WorkflowState> {
        let name = name.trim();
        WorkflowState::ALL
            .into_iter()
            .find(|state| self.name_of(*state).eq_ignore_ascii_case(name))
    }
}

/// `[classifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Summaries equal to (or containing) one of these are press releases.
    #[serde(default = "default_press_markers")]
    pub press_release_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            press_release_markers: default_press_markers(),
        }
    }
}

fn default_press_markers() -> Vec<String> {
    vec!["Sajtóközlemény".into(), "Press release".into()]
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the content store file.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Directory for pre-merge backups. Empty means next to the store file.
    #[serde(default)]
    pub backup_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            backup_dir: String::new(),
        }
    }
}

fn default_store_path() -> String {
    "content/news.yml".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per tracker call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff multiplier applied per further retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}

/// What the workflow driver does when the tracker reports an unexpected pre-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log a warning and still request the transition.
    #[default]
    Proceed,
    /// Log a warning and leave the task's status alone.
    Skip,
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Checkpoint key for this ingestion job.
    #[serde(default = "default_entity_id")]
    pub entity_id: String,

    /// libSQL database holding checkpoints.
    #[serde(default = "default_checkpoint_db")]
    pub checkpoint_db: String,

    /// Overall run timeout; 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Discovery lower bound when no checkpoint exists yet.
    #[serde(default = "default_lookback_days")]
    pub initial_lookback_days: u32,

    #[serde(default)]
    pub on_state_mismatch: MismatchPolicy,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            entity_id: default_entity_id(),
            checkpoint_db: default_checkpoint_db(),
            timeout_secs: default_timeout_secs(),
            initial_lookback_days: default_lookback_days(),
            on_state_mismatch: MismatchPolicy::default(),
        }
    }
}

fn default_entity_id() -> String {
    "content-ingestion".into()
}
fn default_checkpoint_db() -> String {
    "~/.contentflow/checkpoint.db".into()
}
fn default_timeout_secs() -> u64 {
    900
}
fn default_lookback_days() -> u32 {
    30
}

/// `[format]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Hard limit for body lines, block delimiters included.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,

    /// Teasers longer than this are kept but logged.
    #[serde(default = "default_teaser_warn_len")]
    pub teaser_warn_len: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            max_line_len: default_max_line_len(),
            teaser_warn_len: default_teaser_warn_len(),
        }
    }
}

fn default_max_line_len() -> usize {
    120
}
fn default_teaser_warn_len() -> usize {
    200
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings for one pipeline run, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Checkpoint key.
    pub entity_id: String,
    /// Content store file.
    pub store_path: PathBuf,
    /// Backup directory; `None` means the store file's directory.
    pub backup_dir: Option<PathBuf>,
    /// Press-release markers for the classifier.
    pub press_release_markers: Vec<String>,
    /// Overall run deadline.
    pub timeout: Option<Duration>,
    /// Discovery lower bound when no checkpoint exists.
    pub initial_lookback_days: u32,
    pub on_state_mismatch: MismatchPolicy,
    pub max_line_len: usize,
    pub teaser_warn_len: usize,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        let backup_dir = if config.store.backup_dir.trim().is_empty() {
            None
        } else {
            Some(expand_home(&config.store.backup_dir))
        };
        let timeout = match config.run.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            entity_id: config.run.entity_id.clone(),
            store_path: expand_home(&config.store.path),
            backup_dir,
            press_release_markers: config.classifier.press_release_markers.clone(),
            timeout,
            initial_lookback_days: config.run.initial_lookback_days,
            on_state_mismatch: config.run.on_state_mismatch,
            max_line_len: config.format.max_line_len,
            teaser_warn_len: config.format.teaser_warn_len,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contentflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContentFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contentflow/contentflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContentFlowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ContentFlowError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContentFlowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContentFlowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContentFlowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the tracker API token from the env var named in the config.
pub fn tracker_token(config: &TrackerConfig) -> Result<String> {
    let var_name = &config.api_token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ContentFlowError::config(format!(
            "tracker API token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Reject settings that would make a run meaningless.
fn validate(config: &AppConfig) -> Result<()> {
    if config.retry.max_attempts == 0 {
        return Err(ContentFlowError::config("retry.max_attempts must be at least 1"));
    }
    let multiplier = config.retry.multiplier;
    if !multiplier.is_finite() || !(1.0..=10.0).contains(&multiplier) {
        return Err(ContentFlowError::config(
            "retry.multiplier must be a number between 1.0 and 10.0",
        ));
    }
    if config.format.max_line_len < 8 {
        return Err(ContentFlowError::config(
            "format.max_line_len must leave room for the <p></p> delimiters",
        ));
    }
    url::Url::parse(&config.tracker.base_url).map_err(|e| {
        ContentFlowError::config(format!("invalid tracker.base_url: {e}"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("press_release_markers"));
        assert!(toml_str.contains("CONTENTFLOW_TRACKER_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.format.max_line_len, 120);
        assert_eq!(parsed.run.on_state_mismatch, MismatchPolicy::Proceed);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[tracker]
project = "NEWS"

[tracker.statuses]
in_progress = "Folyamatban"

[run]
on_state_mismatch = "skip"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.tracker.project, "NEWS");
        assert_eq!(config.tracker.statuses.in_progress, "Folyamatban");
        assert_eq!(config.tracker.statuses.done, "Done");
        assert_eq!(config.run.on_state_mismatch, MismatchPolicy::Skip);
        assert_eq!(config.classifier.press_release_markers.len(), 2);
    }

    #[test]
    fn status_names_map_both_ways() {
        let names = StatusNames::default();
        assert_eq!(names.name_of(WorkflowState::InProgress), "In Progress");
        assert_eq!(names.state_of("in progress"), Some(WorkflowState::InProgress));
        assert_eq!(names.state_of("Rejected"), None);
    }

    #[test]
    fn run_config_from_app_config() {
        let mut app = AppConfig::default();
        app.run.timeout_secs = 0;
        let run = RunConfig::from(&app);
        assert!(run.timeout.is_none());
        assert!(run.backup_dir.is_none());
        assert_eq!(run.max_line_len, 120);
        assert_eq!(run.store_path, PathBuf::from("content/news.yml"));
    }

    #[test]
    fn invalid_retry_config_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn out_of_range_retry_multiplier_rejected() {
        for multiplier in [f64::INFINITY, f64::NAN, 0.5, 1e300] {
            let mut config = AppConfig::default();
            config.retry.multiplier = multiplier;
            assert!(validate(&config).is_err(), "accepted {multiplier}");
        }
        assert!(validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn token_lookup_fails_for_missing_env() {
        let mut config = TrackerConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.api_token_env = "CF_TEST_NONEXISTENT_TOKEN_12345".into();
        let result = tracker_token(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("token not found"));
    }
}
