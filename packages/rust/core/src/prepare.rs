//! Prepare engine: generate `count` questions, one slot at a time.
//!
//! Two retry layers meet here. Transport failures are retried inside the
//! completion client and arrive as a single [`QuizError::Transport`], which
//! fails the slot. Malformed or duplicate output consumes one of the slot's
//! `max_retries` parsing rounds, each with a fresh nonce.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use quizforge_backend::{CompletionBackend, CompletionParams, Retriever, render_context};
use quizforge_shared::{AppConfig, QuestionItem, QuizError, Result};

use crate::history::HistoryStore;
use crate::parse::parse_question;
use crate::pipeline::ProgressReporter;
use crate::template::{TemplateId, Templates, Variables};

/// Settings for one prepare run.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub count: usize,
    /// Slot `i` uses `themes[i % len]`; empty means no theme.
    pub themes: Vec<String>,
    /// Parsing rounds per slot.
    pub max_retries: u32,
    pub avoid_recent_window: usize,
    /// Exact option count, or 0 for any count of at least two.
    pub options_per_question: usize,
    pub compact_json: bool,
    pub temperature: f32,
    pub rag_k: usize,
    pub snippet_chars: usize,
    pub corpus_chars: usize,
}

impl PrepareOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            count: config.prepare.count,
            themes: config.prepare.themes.clone(),
            max_retries: config.prepare.max_retries.max(1),
            avoid_recent_window: config.prepare.avoid_recent_window,
            options_per_question: config.prepare.options_per_question,
            compact_json: config.prepare.compact_json,
            temperature: config.prepare.temperature,
            rag_k: config.retrieval.k,
            snippet_chars: config.retrieval.snippet_chars,
            corpus_chars: config.retrieval.corpus_chars,
        }
    }

    /// Theme for 0-based `slot`.
    pub fn theme_for(&self, slot: usize) -> &str {
        if self.themes.is_empty() {
            ""
        } else {
            &self.themes[slot % self.themes.len()]
        }
    }
}

/// Per-attempt state, discarded once the attempt resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// 0-based parsing round.
    pub attempt: u32,
    pub nonce: String,
    /// Slot theme, perturbed on every round after the first.
    pub theme: String,
}

impl RetryContext {
    pub fn new(attempt: u32, base_theme: &str) -> Self {
        let nonce = Uuid::new_v4().simple().to_string()[..8].to_string();
        let theme = if attempt > 0 && !base_theme.is_empty() {
            format!("{base_theme} (alt {})", &nonce[..4])
        } else {
            base_theme.to_string()
        };
        Self {
            attempt,
            nonce,
            theme,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

/// How one slot ended.
#[derive(Debug)]
pub struct SlotReport {
    /// 0-based slot index.
    pub slot: usize,
    pub theme: String,
    /// Parsing rounds used (calls that reached the backend).
    pub attempts: u32,
    /// Id of the emitted item, or the error that failed the slot.
    pub outcome: std::result::Result<String, QuizError>,
}

impl SlotReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Items in slot order plus one report per slot.
#[derive(Debug, Default)]
pub struct PrepareOutcome {
    pub items: Vec<QuestionItem>,
    pub reports: Vec<SlotReport>,
}

impl PrepareOutcome {
    pub fn generated(&self) -> usize {
        self.items.len()
    }

    pub fn failed_slots(&self) -> usize {
        self.reports.iter().filter(|r| !r.succeeded()).count()
    }
}

/// Drives the `generate` template through the completion backend.
pub struct PrepareEngine<'a> {
    backend: &'a dyn CompletionBackend,
    retriever: &'a dyn Retriever,
    templates: &'a Templates,
    params: CompletionParams,
    options: PrepareOptions,
}

impl<'a> PrepareEngine<'a> {
    pub fn new(
        backend: &'a dyn CompletionBackend,
        retriever: &'a dyn Retriever,
        templates: &'a Templates,
        params: CompletionParams,
        options: PrepareOptions,
    ) -> Self {
        let params = params.with_temperature(options.temperature);
        Self {
            backend,
            retriever,
            templates,
            params,
            options,
        }
    }

    pub fn options(&self) -> &PrepareOptions {
        &self.options
    }

    /// Generate one question per slot.
    ///
    /// Slot failures are reported in the outcome. Only a template error or a
    /// failed history write aborts the run.
    #[instrument(skip_all, fields(count = self.options.count, model = %self.params.model))]
    pub async fn generate(
        &self,
        history: &mut dyn HistoryStore,
        progress: &dyn ProgressReporter,
    ) -> Result<PrepareOutcome> {
        let start = Instant::now();
        let total = self.options.count;
        let mut outcome = PrepareOutcome::default();

        info!(count = total, history = history.len(), "starting prepare");
        progress.phase("Generating questions");

        for slot in 0..total {
            let theme = self.options.theme_for(slot).to_string();
            progress.task_progress(slot + 1, total, &format!("slot {} {theme}", slot + 1));

            let (item, report) = self.run_slot(slot, &theme, history).await?;
            match &report.outcome {
                Ok(id) => info!(slot = slot + 1, %id, attempts = report.attempts, "slot generated"),
                Err(e) => warn!(slot = slot + 1, error = %e, "slot failed"),
            }
            outcome.items.extend(item);
            outcome.reports.push(report);
        }

        info!(
            generated = outcome.generated(),
            failed = outcome.failed_slots(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "prepare complete"
        );
        Ok(outcome)
    }

    async fn run_slot(
        &self,
        slot: usize,
        base_theme: &str,
        history: &mut dyn HistoryStore,
    ) -> Result<(Option<QuestionItem>, SlotReport)> {
        let id = format!("Q{}", slot + 1);
        let token = Uuid::new_v4().to_string();
        let corpus = self.corpus_for(base_theme).await;
        let avoid_clause = recent_clause(&history.recent(self.options.avoid_recent_window));

        let report = |attempts, outcome| SlotReport {
            slot,
            theme: base_theme.to_string(),
            attempts,
            outcome,
        };

        let mut last_error = String::from("no attempts made");
        for attempt in 0..self.options.max_retries {
            let ctx = RetryContext::new(attempt, base_theme);
            let prompt = self.render_prompt(slot, &token, &ctx, &avoid_clause, &corpus)?;
            let params = self
                .params
                .clone()
                .with_iteration(slot)
                .with_theme(ctx.theme.clone());

            let text = match self.backend.complete(&prompt, &params).await {
                Ok(text) => text,
                Err(e) => return Ok((None, report(attempt + 1, Err(e)))),
            };

            let item = match parse_question(&text, &id, self.options.options_per_question) {
                Ok(item) => item,
                Err(e) => {
                    warn!(slot = slot + 1, attempt = attempt + 1, max = self.options.max_retries, error = %e, "generation output rejected");
                    last_error = e.to_string();
                    continue;
                }
            };

            match history.record(&item.question) {
                Ok(_) => {
                    let id = item.id.clone();
                    return Ok((Some(item), report(attempt + 1, Ok(id))));
                }
                Err(e) if e.is_parse_round() => {
                    warn!(slot = slot + 1, attempt = attempt + 1, max = self.options.max_retries, error = %e, "generated question already seen");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        let attempts = self.options.max_retries;
        Ok((
            None,
            report(
                attempts,
                Err(QuizError::GenerationExhausted {
                    slot: slot + 1,
                    attempts,
                    last_error,
                }),
            ),
        ))
    }

    /// Retrieved reference material for a slot theme, capped at `corpus_chars`.
    ///
    /// Retrieval failure is not fatal: the slot proceeds with an empty corpus.
    async fn corpus_for(&self, theme: &str) -> String {
        if theme.trim().is_empty() {
            debug!("no theme for slot, skipping retrieval");
            return String::new();
        }
        let snippets = match self.retriever.query(theme, self.options.rag_k).await {
            Ok(s) => s,
            Err(e) => {
                warn!(theme, error = %e, "retrieval failed, continuing without corpus");
                return String::new();
            }
        };
        let context = render_context(theme, &snippets, self.options.snippet_chars);
        if context.is_empty() {
            return context;
        }
        let corpus = format!("# FILE: RAG_CONTEXT.md\n{context}\n");
        match corpus.char_indices().nth(self.options.corpus_chars) {
            Some((idx, _)) => corpus[..idx].to_string(),
            None => corpus,
        }
    }

    fn render_prompt(
        &self,
        slot: usize,
        token: &str,
        ctx: &RetryContext,
        recent_clause: &str,
        corpus: &str,
    ) -> Result<String> {
        let mut vars = Variables::from([
            ("token", token.to_string()),
            ("iteration", slot.to_string()),
            ("question_index", (slot + 1).to_string()),
            ("count", self.options.count.to_string()),
            ("model", self.params.model.clone()),
            ("theme", ctx.theme.clone()),
            ("recent_clause", recent_clause.to_string()),
            ("corpus", corpus.to_string()),
            ("style_clause", style_clause(self.options.compact_json).to_string()),
            ("option_clause", option_clause(self.options.options_per_question)),
        ]);
        if ctx.is_retry() {
            vars.insert("retry_nonce", ctx.nonce.clone());
        }
        self.templates.render(TemplateId::Generate, &vars)
    }
}

/// `Avoid reusing these prior question phrasings: a; b` or empty.
pub fn recent_clause(recent: &[String]) -> String {
    if recent.is_empty() {
        String::new()
    } else {
        format!(
            "Avoid reusing these prior question phrasings: {}",
            recent.join("; ")
        )
    }
}

/// Option-count instruction matching what the parser will accept.
pub fn option_clause(options_per_question: usize) -> String {
    match options_per_question {
        0 => "Give at least 2 answer options.".to_string(),
        n => format!("Give exactly {n} answer options."),
    }
}

pub fn style_clause(compact: bool) -> &'static str {
    if compact {
        "Return ONLY a strict compact JSON object; no markdown, no extra text."
    } else {
        "Return ONLY a strict JSON object; no markdown, no extra text."
    }
}
