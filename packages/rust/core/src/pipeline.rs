//! End-to-end pipelines: prepare → quiz files, quiz files → validate → sinks,
//! and `run` (prepare + validate in memory).

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use quizforge_backend::{CompletionBackend, CompletionParams, Retriever};
use quizforge_shared::{QuestionItem, Result};

use crate::documents::{load_quiz_files, write_quiz_files};
use crate::history::HistoryStore;
use crate::prepare::{PrepareEngine, PrepareOptions, PrepareOutcome};
use crate::sink::{ItemSink, SinkReport, write_all};
use crate::template::Templates;
use crate::validate::{ValidateEngine, ValidateOptions, ValidateOutcome};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per slot or item.
    fn task_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn task_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}

/// Counters reported at the end of every batch.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub generated: usize,
    pub failed_slots: usize,
    pub accepted: usize,
    pub dropped: usize,
    pub failed_items: usize,
    pub verdict_parse_failures: u32,
    pub sinks: Vec<SinkReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn absorb_prepare(&mut self, outcome: &PrepareOutcome) {
        self.generated = outcome.generated();
        self.failed_slots = outcome.failed_slots();
    }

    fn absorb_validate(&mut self, outcome: &ValidateOutcome) {
        self.accepted = outcome.accepted.len();
        self.dropped = outcome.dropped();
        self.failed_items = outcome.failed();
        self.verdict_parse_failures = outcome.verdict_parse_failures();
    }

    pub fn failed_sinks(&self) -> usize {
        self.sinks.iter().filter(|s| !s.succeeded()).count()
    }

    /// True when nothing failed outright. Dropped items are not failures.
    pub fn is_clean(&self) -> bool {
        self.failed_slots == 0 && self.failed_items == 0 && self.failed_sinks() == 0
    }
}

/// Shared collaborators for every pipeline stage.
pub struct Pipeline<'a> {
    pub backend: &'a dyn CompletionBackend,
    pub retriever: &'a dyn Retriever,
    pub templates: &'a Templates,
    pub params: CompletionParams,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        backend: &'a dyn CompletionBackend,
        retriever: &'a dyn Retriever,
        templates: &'a Templates,
        params: CompletionParams,
    ) -> Self {
        Self {
            backend,
            retriever,
            templates,
            params,
        }
    }

    async fn generate(
        &self,
        options: PrepareOptions,
        history: &mut dyn HistoryStore,
        progress: &dyn ProgressReporter,
    ) -> Result<PrepareOutcome> {
        PrepareEngine::new(
            self.backend,
            self.retriever,
            self.templates,
            self.params.clone(),
            options,
        )
        .generate(history, progress)
        .await
    }

    async fn check(
        &self,
        options: ValidateOptions,
        items: &[QuestionItem],
        progress: &dyn ProgressReporter,
    ) -> Result<ValidateOutcome> {
        ValidateEngine::new(
            self.backend,
            self.retriever,
            self.templates,
            self.params.clone(),
            options,
        )
        .validate(items, progress)
        .await
    }

    /// Generate questions and write the quiz and answer-key files.
    #[instrument(skip_all, fields(count = options.count, quiz = %quiz_path.display()))]
    pub async fn prepare(
        &self,
        options: PrepareOptions,
        history: &mut dyn HistoryStore,
        quiz_path: &Path,
        answers_path: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        let outcome = self.generate(options, history, progress).await?;
        summary.absorb_prepare(&outcome);

        progress.phase("Writing quiz files");
        write_quiz_files(&outcome.items, quiz_path, answers_path)?;

        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    /// Validate the questions in the quiz files and persist accepted items.
    #[instrument(skip_all, fields(quiz = %quiz_path.display(), sinks = sinks.len()))]
    pub async fn validate(
        &self,
        options: ValidateOptions,
        quiz_path: &Path,
        answers_path: &Path,
        sinks: &[Box<dyn ItemSink>],
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let items = load_quiz_files(quiz_path, answers_path)?;
        let mut summary = self.validate_items(options, &items, sinks, progress).await?;
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    /// Validate `items` and hand the accepted ones to every sink.
    pub async fn validate_items(
        &self,
        options: ValidateOptions,
        items: &[QuestionItem],
        sinks: &[Box<dyn ItemSink>],
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let outcome = self.check(options, items, progress).await?;
        summary.absorb_validate(&outcome);

        progress.phase("Writing results");
        summary.sinks = write_all(sinks, &outcome.accepted).await;
        Ok(summary)
    }

    /// Prepare and validate in one pass.
    ///
    /// Quiz files are still written so the batch can be re-validated later;
    /// validation consumes the generated items directly.
    #[instrument(skip_all, fields(count = prepare.count, sinks = sinks.len()))]
    pub async fn run(
        &self,
        prepare: PrepareOptions,
        validate: ValidateOptions,
        history: &mut dyn HistoryStore,
        quiz_path: &Path,
        answers_path: &Path,
        sinks: &[Box<dyn ItemSink>],
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        let generated = self.generate(prepare, history, progress).await?;
        write_quiz_files(&generated.items, quiz_path, answers_path)?;

        let mut summary = self
            .validate_items(validate, &generated.items, sinks, progress)
            .await?;
        summary.absorb_prepare(&generated);
        summary.elapsed = start.elapsed();

        info!(
            generated = summary.generated,
            failed_slots = summary.failed_slots,
            accepted = summary.accepted,
            dropped = summary.dropped,
            failed_items = summary.failed_items,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::sink::JsonSink;
    use crate::testing::{ScriptedBackend, question_json};
    use quizforge_backend::DisabledRetriever;
    use quizforge_shared::{AcceptedItem, AppConfig, QuizError};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn tmp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qf-pipeline-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn prepare_options(count: usize) -> PrepareOptions {
        PrepareOptions {
            count,
            themes: vec![],
            ..PrepareOptions::from_config(&AppConfig::default())
        }
    }

    fn validate_options() -> ValidateOptions {
        ValidateOptions::from_config(&AppConfig::default())
    }

    #[tokio::test]
    async fn run_passes_items_through_both_stages() {
        let dir = tmp_dir();
        let out = dir.join("validated_quiz.json");
        let backend = ScriptedBackend::new([
            question_json("Which Greek letter comes second?"),
            "False".into(),
            "True".into(),
            "False".into(),
            "False".into(),
        ]);
        let templates = Templates::builtin();
        let pipeline = Pipeline::new(
            &backend,
            &DisabledRetriever,
            &templates,
            CompletionParams::default(),
        );
        let sinks: Vec<Box<dyn ItemSink>> = vec![Box::new(JsonSink::new(&out))];
        let mut history = MemoryHistory::new();

        let summary = pipeline
            .run(
                prepare_options(1),
                validate_options(),
                &mut history,
                &dir.join("quiz.json"),
                &dir.join("answer_key.json"),
                &sinks,
                &SilentProgress,
            )
            .await
            .unwrap();

        assert_eq!(summary.generated, 1);
        assert_eq!(summary.accepted, 1);
        assert!(summary.is_clean());

        // Empty retrieval leaves no context block ahead of the validate prompt.
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 5);
        assert!(prompts[1].starts_with("You are checking one answer"));

        let accepted: Vec<AcceptedItem> =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(accepted[0].id, "Q1");
        assert_eq!(accepted[0].answer.as_deref(), Some("Beta"));
        assert_eq!(accepted[0].verdicts.len(), 4);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn validate_rerun_is_byte_identical() {
        let dir = tmp_dir();
        let (quiz, answers, out) = (
            dir.join("quiz.json"),
            dir.join("answer_key.json"),
            dir.join("validated_quiz.json"),
        );
        let item = crate::parse::parse_question(&question_json("Second letter?"), "Q1", 4).unwrap();
        write_quiz_files(&[item], &quiz, &answers).unwrap();

        let templates = Templates::builtin();
        let sinks: Vec<Box<dyn ItemSink>> = vec![Box::new(JsonSink::new(&out))];
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let backend = ScriptedBackend::new(["True", "False", "False", "False"]);
            let pipeline = Pipeline::new(
                &backend,
                &DisabledRetriever,
                &templates,
                CompletionParams::default(),
            );
            pipeline
                .validate(validate_options(), &quiz, &answers, &sinks, &SilentProgress)
                .await
                .unwrap();
            outputs.push(std::fs::read(&out).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_slots_and_items_are_counted_not_fatal() {
        let dir = tmp_dir();
        let backend = ScriptedBackend::default();
        backend.push_transport_error(3);
        backend.push_ok(question_json("Which letter is beta?"));
        backend.push_ok("False");
        backend.push_ok("False");
        backend.push_ok("False");
        backend.push_ok("False");
        let templates = Templates::builtin();
        let pipeline = Pipeline::new(
            &backend,
            &DisabledRetriever,
            &templates,
            CompletionParams::default(),
        );

        let summary = pipeline
            .run(
                prepare_options(2),
                validate_options(),
                &mut MemoryHistory::new(),
                &dir.join("quiz.json"),
                &dir.join("answer_key.json"),
                &[],
                &SilentProgress,
            )
            .await
            .unwrap();

        assert_eq!(summary.generated, 1);
        assert_eq!(summary.failed_slots, 1);
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.dropped, 1);
        assert!(!summary.is_clean());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn prepare_writes_quiz_files() {
        let dir = tmp_dir();
        let (quiz, answers) = (dir.join("quiz.json"), dir.join("answer_key.json"));
        let backend = ScriptedBackend::new([question_json("Which one is Beta?")]);
        let templates = Templates::builtin();
        let pipeline = Pipeline::new(
            &backend,
            &DisabledRetriever,
            &templates,
            CompletionParams::default(),
        );

        let summary = pipeline
            .prepare(
                prepare_options(1),
                &mut MemoryHistory::new(),
                &quiz,
                &answers,
                &SilentProgress,
            )
            .await
            .unwrap();
        assert_eq!(summary.generated, 1);

        let loaded = load_quiz_files(&quiz, &answers).unwrap();
        assert_eq!(loaded[0].answer(), Some("Beta"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_template_variable_aborts_the_run() {
        let dir = tmp_dir();
        let backend = ScriptedBackend::default();
        let mut templates = Templates::builtin();
        templates.set(
            crate::template::TemplateId::Generate,
            "${token} ${corpus} ${undeclared}",
        );
        let pipeline = Pipeline::new(
            &backend,
            &DisabledRetriever,
            &templates,
            CompletionParams::default(),
        );

        let err = pipeline
            .prepare(
                prepare_options(1),
                &mut MemoryHistory::new(),
                &dir.join("quiz.json"),
                &dir.join("answer_key.json"),
                &SilentProgress,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::MissingVariable { .. }));
        assert_eq!(backend.calls(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
