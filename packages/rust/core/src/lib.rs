//! Quiz generation and validation for QuizForge.
//!
//! This crate ties together prompt templates, model-output parsing, the dedup
//! history, and the completion backend into the `prepare`, `validate`, and
//! `chat` workflows. [`pipeline::Pipeline`] runs them end to end.

pub mod chat;
pub mod documents;
pub mod history;
pub mod parse;
pub mod pipeline;
pub mod prepare;
pub mod sink;
pub mod template;
pub mod validate;

#[cfg(test)]
mod testing;

pub use chat::{ChatOptions, ChatSession, ChatTurn, Role, run_repl};
pub use documents::{AnswerEntry, QuizEntry, load_quiz_files, write_quiz_files};
pub use history::{FileHistory, HistoryStore, MemoryHistory};
pub use pipeline::{Pipeline, ProgressReporter, RunSummary, SilentProgress};
pub use prepare::{PrepareEngine, PrepareOptions, PrepareOutcome};
pub use sink::{ItemSink, JsonSink, RelationalSink, SinkReport};
pub use template::{TemplateId, Templates};
pub use validate::{ValidateEngine, ValidateOptions, ValidateOutcome};
