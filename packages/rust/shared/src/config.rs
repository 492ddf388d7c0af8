//! Application configuration for eventharvest.
//!
//! User config lives at `~/.eventharvest/eventharvest.toml`.
//! Every field has a default, so a missing or partial file is valid.
//! API keys are never stored here; the config names the env vars that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "eventharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".eventharvest";

// ---------------------------------------------------------------------------
// Config structs (matching eventharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub ein: EinConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Bounded exponential backoff: `min(base * 2^(attempt-1), max)` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .base_delay_ms
            .saturating_mul(exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 20_000,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/eventharvest.db".into()
}

/// `[llm]` section. Any OpenAI-compatible chat completions endpoint works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Pause after each successful completion.
    #[serde(default = "default_llm_pause")]
    pub pause_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            timeout_secs: default_llm_timeout(),
            pause_ms: default_llm_pause(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_pause() -> u64 {
    1_000
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_serpapi_key_env")]
    pub serpapi_key_env: String,

    #[serde(default = "default_google_key_env")]
    pub google_api_key_env: String,

    #[serde(default = "default_google_cse_env")]
    pub google_cse_id_env: String,

    #[serde(default = "default_serpapi_base_url")]
    pub serpapi_base_url: String,

    #[serde(default = "default_google_cse_base_url")]
    pub google_cse_base_url: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Results requested per query by the extraction and EIN steps.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            serpapi_key_env: default_serpapi_key_env(),
            google_api_key_env: default_google_key_env(),
            google_cse_id_env: default_google_cse_env(),
            serpapi_base_url: default_serpapi_base_url(),
            google_cse_base_url: default_google_cse_base_url(),
            timeout_secs: default_search_timeout(),
            results_per_query: default_results_per_query(),
        }
    }
}

fn default_serpapi_key_env() -> String {
    "SERPAPI_KEY".into()
}
fn default_google_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_google_cse_env() -> String {
    "GOOGLE_CSE_ID".into()
}
fn default_serpapi_base_url() -> String {
    "https://serpapi.com".into()
}
fn default_google_cse_base_url() -> String {
    "https://www.googleapis.com".into()
}
fn default_search_timeout() -> u64 {
    20
}
fn default_results_per_query() -> usize {
    6
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_attempts")]
    pub attempts: u32,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Linear backoff unit: the pause after attempt `n` is `n * backoff_ms`.
    #[serde(default = "default_fetch_backoff")]
    pub backoff_ms: u64,

    /// Pause between consecutive deep-search page fetches.
    #[serde(default = "default_fetch_pause")]
    pub pause_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempts: default_fetch_attempts(),
            timeout_secs: default_fetch_timeout(),
            backoff_ms: default_fetch_backoff(),
            pause_ms: default_fetch_pause(),
        }
    }
}

fn default_fetch_attempts() -> u32 {
    3
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_fetch_backoff() -> u64 {
    1_500
}
fn default_fetch_pause() -> u64 {
    600
}

/// `[extraction]` section: single-pass extraction and escalation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Page text characters embedded in the single-pass prompt.
    #[serde(default = "default_content_chars")]
    pub content_chars: usize,

    /// Missing-field count at or above which escalation runs.
    #[serde(default = "default_missing_threshold")]
    pub missing_fields_threshold: usize,

    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Per-page text cap when aggregating.
    #[serde(default = "default_page_chars")]
    pub page_chars: usize,

    /// Overall cap on the aggregated text passed to the model.
    #[serde(default = "default_total_chars")]
    pub total_chars: usize,

    /// Raw links processed per `parse` run.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            content_chars: default_content_chars(),
            missing_fields_threshold: default_missing_threshold(),
            max_queries: default_max_queries(),
            max_candidates: default_max_candidates(),
            max_pages: default_max_pages(),
            page_chars: default_page_chars(),
            total_chars: default_total_chars(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_content_chars() -> usize {
    4_000
}
fn default_missing_threshold() -> usize {
    4
}
fn default_max_queries() -> usize {
    6
}
fn default_max_candidates() -> usize {
    12
}
fn default_max_pages() -> usize {
    6
}
fn default_page_chars() -> usize {
    3_500
}
fn default_total_chars() -> usize {
    21_000
}
fn default_batch_limit() -> usize {
    1_000
}

/// `[ein]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EinConfig {
    /// Result pages fetched per query when no snippet carries a tax ID.
    #[serde(default = "default_ein_fetches")]
    pub max_page_fetches: usize,

    #[serde(default = "default_ein_timeout")]
    pub page_timeout_secs: u64,
}

impl Default for EinConfig {
    fn default() -> Self {
        Self {
            max_page_fetches: default_ein_fetches(),
            page_timeout_secs: default_ein_timeout(),
        }
    }
}

fn default_ein_fetches() -> usize {
    6
}
fn default_ein_timeout() -> u64 {
    10
}

/// `[enrichment]` section: the batch loop over stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrich_batch")]
    pub batch_size: usize,

    /// Maximum subjects (organizers + events) processed per run.
    #[serde(default = "default_enrich_budget")]
    pub budget: usize,

    /// Pause after each subject.
    #[serde(default = "default_enrich_pause")]
    pub pause_ms: u64,

    #[serde(default = "default_enrich_retry")]
    pub retry: RetryPolicy,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_enrich_batch(),
            budget: default_enrich_budget(),
            pause_ms: default_enrich_pause(),
            retry: default_enrich_retry(),
        }
    }
}

fn default_enrich_batch() -> usize {
    8
}
fn default_enrich_budget() -> usize {
    50
}
fn default_enrich_pause() -> u64 {
    2_000
}
fn default_enrich_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay_ms: 1_000,
        max_delay_ms: 1_000,
    }
}

/// `[ingest]` section: search queries that seed the raw link table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,

    #[serde(default = "default_ingest_results")]
    pub results_per_query: usize,

    /// Overall cap on new links saved in one run.
    #[serde(default = "default_save_limit")]
    pub save_limit: usize,

    #[serde(default = "default_ingest_pause")]
    pub pause_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            results_per_query: default_ingest_results(),
            save_limit: default_save_limit(),
            pause_ms: default_ingest_pause(),
        }
    }
}

fn default_queries() -> Vec<String> {
    [
        "charity gala Chicago Illinois",
        "fundraising event Chicago Illinois",
        "nonprofit gala Chicago",
        "charity golf tournament Chicago",
        "benefit concert Chicago",
        "charity auction Chicago",
        "foundation fundraising event Chicago",
        "nonprofit events Chicago",
    ]
    .iter()
    .map(|q| q.to_string())
    .collect()
}
fn default_ingest_results() -> usize {
    100
}
fn default_save_limit() -> usize {
    1_000
}
fn default_ingest_pause() -> u64 {
    1_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.eventharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.eventharvest/eventharvest.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a non-empty secret from the named env var.
pub fn env_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Check that the language model API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.llm.api_key_env;
    match env_secret(var_name) {
        Some(_) => Ok(()),
        None => Err(HarvestError::config(format!(
            "language model API key not found. Set the {var_name} environment variable."
        ))),
    }
}
