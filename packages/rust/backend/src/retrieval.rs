//! Retrieval adapter for the vector-store service.
//!
//! The service is a black box reached over HTTP. Snippets come back as text
//! plus free-form metadata; [`render_context`] turns them into the numbered
//! context blocks injected into prompts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use quizforge_shared::{QuizError, Result, RetrievalConfig};

/// One nearest-neighbour hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Snippet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Nearest-neighbour lookup over the knowledge base.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` snippets for `text`.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Snippet>>;
}

/// Retriever used when no service is configured. Always empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRetriever;

#[async_trait]
impl Retriever for DisabledRetriever {
    async fn query(&self, _text: &str, _k: usize) -> Result<Vec<Snippet>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// HTTP retriever
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

/// Retriever backed by `POST <url>` with `{"query", "k"}`.
pub struct HttpRetriever {
    client: Client,
    url: String,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuizError::Retrieval(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    #[instrument(skip_all, fields(k))]
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Snippet>> {
        let response = self
            .client
            .post(&self.url)
            .json(&QueryRequest { query: text, k })
            .send()
            .await
            .map_err(|e| QuizError::Retrieval(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuizError::Retrieval(format!("HTTP {status} from {}", self.url)));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| QuizError::Retrieval(format!("malformed response: {e}")))?;

        debug!(hits = body.results.len(), "retrieval complete");
        Ok(body.results)
    }
}

/// Build the retriever described by the `[retrieval]` section.
pub fn retriever_from_config(config: &RetrievalConfig) -> Result<Arc<dyn Retriever>> {
    match &config.url {
        Some(url) => Ok(Arc::new(HttpRetriever::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(DisabledRetriever)),
    }
}

// ---------------------------------------------------------------------------
// Context rendering
// ---------------------------------------------------------------------------

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render snippets as numbered context blocks under a header.
///
/// Each snippet is cut to `snippet_chars` and de-duplicated; the block label
/// carries the source file and section heading from metadata when present.
/// Returns an empty string when nothing survives.
pub fn render_context(query: &str, snippets: &[Snippet], snippet_chars: usize) -> String {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();

    for snippet in snippets {
        let text = truncate_chars(&snippet.text, snippet_chars).trim();
        if text.is_empty() || !seen.insert(text) {
            continue;
        }
        let source = snippet
            .meta_str("source")
            .or_else(|| snippet.meta_str("rel_path"))
            .or_else(|| snippet.meta_str("path"))
            .unwrap_or("unknown");
        let heading = match snippet.meta_str("section_heading") {
            Some(h) => h.to_string(),
            None => truncate_chars(text.lines().next().unwrap_or(""), 80).to_string(),
        };
        blocks.push(format!(
            "[C{}] (source: {source}, heading: {heading})\n{text}",
            blocks.len() + 1
        ));
    }

    if blocks.is_empty() {
        return String::new();
    }

    let header = if query.trim().is_empty() {
        "# Retrieved context".to_string()
    } else {
        format!("# Retrieved context for: {}", query.trim())
    };
    format!("{header}\n\n---\n\n{}", blocks.join("\n\n"))
}

fn is_banner(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('#') || line.starts_with("===") || line.starts_with("---")
}

/// Strip blank lines and the leading banner run from retrieved context.
pub fn sanitize_context(raw: &str) -> String {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .skip_while(|l| is_banner(l))
        .collect::<Vec<_>>()
        .join("\n")
}
