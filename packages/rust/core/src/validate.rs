//! Validate engine: ask the model to judge every option of every question.
//!
//! Each option gets its own `True`/`False` verdict. Questions keep only the
//! options judged true; a question with none is dropped.

use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use quizforge_backend::{
    CompletionBackend, CompletionParams, Retriever, render_context, sanitize_context,
};
use quizforge_shared::{AcceptedItem, AppConfig, QuestionItem, QuizError, Result, ValidationVerdict};

use crate::pipeline::ProgressReporter;
use crate::template::{TemplateId, Templates, Variables};

/// Settings for one validate run.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub rag_k: usize,
    pub snippet_chars: usize,
    /// Extra asks when the reply is neither `True` nor `False`.
    pub verdict_retries: u32,
}

impl ValidateOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            rag_k: config.retrieval.k,
            snippet_chars: config.retrieval.snippet_chars,
            verdict_retries: config.validate.verdict_retries,
        }
    }
}

/// Final state of one question.
#[derive(Debug)]
pub enum ItemStatus {
    Accepted,
    /// Every verdict was false.
    Dropped,
    /// A transport error stopped evaluation of this question.
    Failed(QuizError),
}

#[derive(Debug)]
pub struct ItemReport {
    pub id: String,
    pub status: ItemStatus,
    /// Replies that were neither `True` nor `False`.
    pub verdict_parse_failures: u32,
}

/// Accepted items in input order plus per-item reports.
#[derive(Debug, Default)]
pub struct ValidateOutcome {
    pub accepted: Vec<AcceptedItem>,
    pub reports: Vec<ItemReport>,
}

impl ValidateOutcome {
    pub fn dropped(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Dropped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed(_)))
    }

    pub fn verdict_parse_failures(&self) -> u32 {
        self.reports.iter().map(|r| r.verdict_parse_failures).sum()
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Parse a verdict reply. Only `True` and `False` (after trimming) count.
pub fn parse_verdict(reply: &str) -> Result<bool> {
    match reply.trim() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(QuizError::parse(format!(
            "expected True or False, got '{}'",
            other.chars().take(80).collect::<String>()
        ))),
    }
}

/// `Context (from knowledge base):` block, or empty for no context.
pub fn context_section(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!("Context (from knowledge base):\n{context}\n\n")
    }
}

/// Options as a plain `- option` list.
pub fn options_list(options: &[String]) -> String {
    options
        .iter()
        .map(|o| format!("- {o}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ValidateEngine<'a> {
    backend: &'a dyn CompletionBackend,
    retriever: &'a dyn Retriever,
    templates: &'a Templates,
    params: CompletionParams,
    options: ValidateOptions,
}

impl<'a> ValidateEngine<'a> {
    pub fn new(
        backend: &'a dyn CompletionBackend,
        retriever: &'a dyn Retriever,
        templates: &'a Templates,
        params: CompletionParams,
        options: ValidateOptions,
    ) -> Self {
        Self {
            backend,
            retriever,
            templates,
            params,
            options,
        }
    }

    /// Validate `items` in order.
    ///
    /// Item failures are reported in the outcome; only a template error
    /// aborts the run.
    #[instrument(skip_all, fields(items = items.len(), model = %self.params.model))]
    pub async fn validate(
        &self,
        items: &[QuestionItem],
        progress: &dyn ProgressReporter,
    ) -> Result<ValidateOutcome> {
        let start = Instant::now();
        let mut outcome = ValidateOutcome::default();
        progress.phase("Validating answers");

        for (i, item) in items.iter().enumerate() {
            progress.task_progress(i + 1, items.len(), &item.id);
            let (accepted, report) = self.validate_item(item).await?;
            match &report.status {
                ItemStatus::Accepted => info!(id = %item.id, "question accepted"),
                ItemStatus::Dropped => warn!(id = %item.id, "no option judged true, dropping question"),
                ItemStatus::Failed(e) => warn!(id = %item.id, error = %e, "validation failed"),
            }
            outcome.accepted.extend(accepted);
            outcome.reports.push(report);
        }

        info!(
            accepted = outcome.accepted.len(),
            dropped = outcome.dropped(),
            failed = outcome.failed(),
            verdict_parse_failures = outcome.verdict_parse_failures(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "validate complete"
        );
        Ok(outcome)
    }

    async fn validate_item(&self, item: &QuestionItem) -> Result<(Option<AcceptedItem>, ItemReport)> {
        let context = self.context_for(&item.question).await;
        let section = context_section(&context);
        let options = options_list(&item.options);
        let explanation = item.explanation.clone().unwrap_or_default();

        let mut report = ItemReport {
            id: item.id.clone(),
            status: ItemStatus::Accepted,
            verdict_parse_failures: 0,
        };
        let mut verdicts = Vec::with_capacity(item.options.len());

        for option in &item.options {
            let vars = Variables::from([
                ("context_section", section.clone()),
                ("question", item.question.clone()),
                ("options", options.clone()),
                ("provided_answer_text", option.clone()),
                ("explanation", explanation.clone()),
            ]);
            let prompt = self.templates.render(TemplateId::Validate, &vars)?;

            let verdict = match self.ask(&item.id, &prompt, &mut report).await {
                Ok(v) => v,
                Err(e) => {
                    report.status = ItemStatus::Failed(e);
                    return Ok((None, report));
                }
            };
            debug!(id = %item.id, option = %option, verdict, "verdict");
            verdicts.push(ValidationVerdict {
                question_id: item.id.clone(),
                option: option.clone(),
                verdict,
                context_used: (!context.is_empty()).then(|| context.clone()),
            });
        }

        let accepted = AcceptedItem::from_verdicts(item, verdicts);
        if accepted.is_none() {
            report.status = ItemStatus::Dropped;
        }
        Ok((accepted, report))
    }

    /// Ask for one verdict, re-asking up to `verdict_retries` times on an
    /// unparsable reply. An unparsable final reply counts as false.
    async fn ask(&self, id: &str, prompt: &str, report: &mut ItemReport) -> Result<bool> {
        for attempt in 0..=self.options.verdict_retries {
            let reply = self.backend.complete(prompt, &self.params).await?;
            match parse_verdict(&reply) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    report.verdict_parse_failures += 1;
                    warn!(id, attempt = attempt + 1, max = self.options.verdict_retries + 1, error = %e, "unparsable verdict");
                }
            }
        }
        Ok(false)
    }

    /// Sanitized retrieval context for a question. Empty on failure.
    async fn context_for(&self, question: &str) -> String {
        match self.retriever.query(question, self.options.rag_k).await {
            Ok(snippets) => {
                sanitize_context(&render_context(question, &snippets, self.options.snippet_chars))
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed, validating without context");
                String::new()
            }
        }
    }
}
