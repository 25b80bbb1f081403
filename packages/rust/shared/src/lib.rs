//! Shared types, error model, and configuration for QuizForge.
//!
//! This crate is the foundation depended on by all other QuizForge crates.
//! It provides:
//! - [`QuizError`]: the unified error type
//! - Domain types ([`QuestionItem`], [`AcceptedItem`], [`ValidationVerdict`],
//!   [`HistoryRecord`], [`Fingerprint`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackoffConfig, BackoffPolicy, ChatConfig, DebugConfig, LlmConfig, PrepareConfig,
    RetrievalConfig, TemplatesConfig, ValidateConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_config,
};
pub use error::{QuizError, Result};
pub use types::{
    AcceptedItem, Fingerprint, HistoryRecord, QuestionItem, ValidationVerdict, normalize_question,
};
