//! Application configuration for QuizForge.
//!
//! User config lives at `~/.quizforge/quizforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuizError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "quizforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".quizforge";

// ---------------------------------------------------------------------------
// Config structs (matching quizforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion backend settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector-store retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Quiz generation settings.
    #[serde(default)]
    pub prepare: PrepareConfig,

    /// Answer validation settings.
    #[serde(default)]
    pub validate: ValidateConfig,

    /// Interactive chat settings.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Raw prompt/payload/response dumps.
    #[serde(default)]
    pub debug: DebugConfig,

    /// Prompt template overrides.
    #[serde(default)]
    pub templates: TemplatesConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Full URL of the generate endpoint.
    #[serde(default = "default_llm_url")]
    pub url: String,

    /// Model name passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for validation calls (backend default when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// How long the backend keeps the model loaded (e.g. `5m`).
    #[serde(default = "default_keep_alive", skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Total transport attempts per completion call (not parsing retries).
    #[serde(default = "default_llm_retries")]
    pub llm_retries: u32,

    /// Delay policy between transport attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_model(),
            temperature: None,
            num_predict: None,
            top_k: None,
            top_p: None,
            keep_alive: default_keep_alive(),
            http_timeout_secs: default_http_timeout(),
            llm_retries: default_llm_retries(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434/api/generate".into()
}
fn default_model() -> String {
    "mistral".into()
}
fn default_keep_alive() -> Option<String> {
    Some("5m".into())
}
fn default_http_timeout() -> u64 {
    240
}
fn default_llm_retries() -> u32 {
    3
}

/// Shape of the delay curve between transport attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after every failed attempt, capped at `max_delay_ms`.
    Exponential,
}

/// `[llm.backoff]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_policy")]
    pub policy: BackoffPolicy,

    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: default_backoff_policy(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_backoff_policy() -> BackoffPolicy {
    BackoffPolicy::Exponential
}
fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Query endpoint of the vector-store service. Retrieval is disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Number of snippets to request.
    #[serde(default = "default_rag_k")]
    pub k: usize,

    /// Maximum characters kept per snippet.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    /// Maximum characters of assembled corpus injected into generation prompts.
    #[serde(default = "default_corpus_chars")]
    pub corpus_chars: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: None,
            k: default_rag_k(),
            snippet_chars: default_snippet_chars(),
            corpus_chars: default_corpus_chars(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

fn default_rag_k() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    1_000
}
fn default_corpus_chars() -> usize {
    28_000
}
fn default_retrieval_timeout() -> u64 {
    30
}

/// `[prepare]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareConfig {
    /// Number of question slots per run.
    #[serde(default = "default_count")]
    pub count: usize,

    /// Public quiz output file.
    #[serde(default = "default_quiz_path")]
    pub quiz: String,

    /// Answer key output file.
    #[serde(default = "default_answers_path")]
    pub answers: String,

    /// Number of recent history questions quoted back to the model as phrasings to avoid.
    #[serde(default = "default_avoid_recent_window")]
    pub avoid_recent_window: usize,

    /// Total parsing rounds per slot (malformed or duplicate output consumes one).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Topic hints; slot `i` uses `themes[i % len]`.
    #[serde(default)]
    pub themes: Vec<String>,

    /// Exact option count required per question (0 accepts any count of at least 2).
    #[serde(default = "default_options_per_question")]
    pub options_per_question: usize,

    /// Dedup history file (JSON Lines).
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// Ask the model for compact JSON.
    #[serde(default)]
    pub compact_json: bool,

    /// Sampling temperature for generation calls.
    #[serde(default = "default_prepare_temperature")]
    pub temperature: f32,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            quiz: default_quiz_path(),
            answers: default_answers_path(),
            avoid_recent_window: default_avoid_recent_window(),
            max_retries: default_max_retries(),
            themes: Vec::new(),
            options_per_question: default_options_per_question(),
            history_path: default_history_path(),
            compact_json: false,
            temperature: default_prepare_temperature(),
        }
    }
}

fn default_count() -> usize {
    5
}
fn default_quiz_path() -> String {
    "quiz.json".into()
}
fn default_answers_path() -> String {
    "answer_key.json".into()
}
fn default_avoid_recent_window() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_options_per_question() -> usize {
    4
}
fn default_history_path() -> String {
    ".quiz_history.jsonl".into()
}
fn default_prepare_temperature() -> f32 {
    0.4
}

/// `[validate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Quiz file to read when validating a previous `prepare` run.
    #[serde(default = "default_quiz_path")]
    pub quiz: String,

    /// Answer key file to read alongside `quiz`.
    #[serde(default = "default_answers_path")]
    pub answers: String,

    /// Validated questions output (JSON document sink).
    #[serde(default = "default_validated_path")]
    pub output: String,

    /// Extra attempts when the verdict is not exactly `True` or `False`.
    #[serde(default)]
    pub verdict_retries: u32,

    /// SQLite/libSQL database for the relational sink. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            quiz: default_quiz_path(),
            answers: default_answers_path(),
            output: default_validated_path(),
            verdict_retries: 0,
            db_path: None,
        }
    }
}

fn default_validated_path() -> String {
    "validated_quiz.json".into()
}

/// `[chat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Sliding window size, in turns (user and assistant turns both count).
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_chat_temperature")]
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            temperature: default_chat_temperature(),
        }
    }
}

fn default_window() -> usize {
    12
}
fn default_chat_temperature() -> f32 {
    0.2
}

/// `[debug]` section. Every dump is off unless a path is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Latest rendered prompt (overwritten on every call).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_prompt: Option<String>,

    /// Request payloads, JSON Lines, appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_payload: Option<String>,

    /// Raw backend responses, JSON Lines, appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_response: Option<String>,
}

/// `[templates]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory with `generate.tmpl`, `validate.tmpl`, `chat.tmpl` overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.quizforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| QuizError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.quizforge/quizforge.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| QuizError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| QuizError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| QuizError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| QuizError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| QuizError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    url::Url::parse(&config.llm.url)
        .map_err(|e| QuizError::config(format!("invalid llm.url '{}': {e}", config.llm.url)))?;
    if let Some(ref rag) = config.retrieval.url {
        url::Url::parse(rag)
            .map_err(|e| QuizError::config(format!("invalid retrieval.url '{rag}': {e}")))?;
    }
    if config.llm.llm_retries == 0 {
        return Err(QuizError::config("llm.llm_retries must be at least 1"));
    }
    if config.llm.backoff.max_delay_ms < config.llm.backoff.base_delay_ms {
        return Err(QuizError::config(
            "llm.backoff.max_delay_ms must not be below base_delay_ms",
        ));
    }
    if config.prepare.max_retries == 0 {
        return Err(QuizError::config("prepare.max_retries must be at least 1"));
    }
    if config.prepare.count == 0 {
        return Err(QuizError::config("prepare.count must be at least 1"));
    }
    if config.prepare.options_per_question == 1 {
        return Err(QuizError::config(
            "prepare.options_per_question must be 0 (any) or at least 2",
        ));
    }
    if config.chat.window == 0 {
        return Err(QuizError::config("chat.window must be at least 1"));
    }
    Ok(())
}
