//! Error types for QuizForge.
//!
//! Library crates use [`QuizError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Transport failures and output-parsing failures are deliberately separate
//! variants: they are retried at different layers with independent budgets.

use std::path::PathBuf;

/// Top-level error type for all QuizForge operations.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Completion backend unreachable or errored after all transport attempts.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// Model output did not match the expected structure.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Generated question was already produced in this or an earlier run.
    #[error("duplicate question (fingerprint {fingerprint})")]
    Duplicate { fingerprint: String },

    /// A generation slot used up its parsing budget without a valid, novel item.
    #[error("slot {slot} exhausted after {attempts} attempt(s): {last_error}")]
    GenerationExhausted {
        slot: usize,
        attempts: u32,
        last_error: String,
    },

    /// A prompt template references a variable that was not supplied.
    #[error("template '{template}' is missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    /// Persisting accepted items to a sink failed.
    #[error("{sink} sink write failed: {message}")]
    SinkWrite { sink: String, message: String },

    /// Vector-store retrieval failed.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid input files, bad shapes, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, QuizError>;

impl QuizError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transport error for a failure seen after `attempts` tries.
    pub fn transport(attempts: u32, msg: impl Into<String>) -> Self {
        Self::Transport {
            attempts,
            message: msg.into(),
        }
    }

    /// Create a sink write error tagged with the sink name.
    pub fn sink(sink: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink: sink.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error consumes a parsing round rather than failing the slot.
    pub fn is_parse_round(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Duplicate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = QuizError::config("llm_retries must be at least 1");
        assert_eq!(err.to_string(), "config error: llm_retries must be at least 1");

        let err = QuizError::transport(3, "HTTP 503");
        assert_eq!(err.to_string(), "transport error after 3 attempt(s): HTTP 503");

        let err = QuizError::MissingVariable {
            template: "generate".into(),
            variable: "corpus".into(),
        };
        assert!(err.to_string().contains("'corpus'"));
    }

    #[test]
    fn parse_and_duplicate_share_retry_budget() {
        assert!(QuizError::parse("bad json").is_parse_round());
        assert!(
            QuizError::Duplicate {
                fingerprint: "abc".into()
            }
            .is_parse_round()
        );
        assert!(!QuizError::transport(1, "refused").is_parse_round());
        assert!(
            !QuizError::MissingVariable {
                template: "t".into(),
                variable: "v".into()
            }
            .is_parse_round()
        );
    }
}
