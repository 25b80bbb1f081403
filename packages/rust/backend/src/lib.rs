//! Clients for the two black-box services the pipeline talks to.
//!
//! This crate provides:
//! - [`completion`]: the completion backend trait and its Ollama-style HTTP client
//! - [`retry`]: transport-level retry with fixed or exponential backoff
//! - [`dump`]: optional append-only debug sinks for prompts, payloads, and responses
//! - [`retrieval`]: the vector-store query trait, HTTP adapter, and context formatting

pub mod completion;
pub mod dump;
pub mod retrieval;
pub mod retry;

pub use completion::{CompletionBackend, CompletionParams, OllamaClient};
pub use dump::DumpSink;
pub use retrieval::{
    DisabledRetriever, HttpRetriever, Retriever, Snippet, render_context, retriever_from_config,
    sanitize_context,
};
pub use retry::RetryPolicy;
