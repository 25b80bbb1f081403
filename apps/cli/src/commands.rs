//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use quizforge_backend::{
    CompletionParams, DumpSink, OllamaClient, Retriever, retriever_from_config,
};
use quizforge_core::{
    ChatOptions, ChatSession, FileHistory, ItemSink, JsonSink, Pipeline, PrepareOptions,
    ProgressReporter, RelationalSink, RunSummary, Templates, ValidateOptions, run_repl,
};
use quizforge_shared::{AppConfig, init_config, load_config, load_config_from, validate_config};
use tracing::{info, warn};

/// Exit code for a run cancelled with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// QuizForge: generate and validate multiple-choice quizzes.
#[derive(Parser)]
#[command(
    name = "quizforge",
    version,
    about = "Generate multiple-choice quizzes with a local model and keep only the validated ones.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.quizforge/quizforge.toml).
    #[arg(long, global = true, env = "QUIZFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Completion model, overriding `llm.model`.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Completion endpoint, overriding `llm.url`.
    #[arg(long, global = true)]
    pub llm_url: Option<String>,

    /// Retrieval endpoint, overriding `retrieval.url`.
    #[arg(long, global = true)]
    pub rag_url: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate questions and write the quiz and answer-key files.
    Prepare {
        #[command(flatten)]
        prepare: PrepareArgs,
    },

    /// Check every option of a prepared quiz and persist accepted questions.
    Validate {
        #[command(flatten)]
        validate: ValidateArgs,
    },

    /// Prepare and validate in one pass.
    Run {
        #[command(flatten)]
        prepare: PrepareArgs,

        #[command(flatten)]
        validate: ValidateArgs,
    },

    /// Chat with the model over the knowledge base.
    Chat {
        /// Turns kept in the conversation window.
        #[arg(long)]
        window: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the `[prepare]` section.
#[derive(Args, Debug, Default)]
pub(crate) struct PrepareArgs {
    /// Number of questions to generate.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Topic focus; repeat to rotate themes across slots.
    #[arg(long = "theme")]
    pub themes: Vec<String>,

    /// Parsing rounds per question.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Dedup history file.
    #[arg(long)]
    pub history: Option<String>,

    /// Quiz file to write.
    #[arg(long)]
    pub quiz_out: Option<String>,

    /// Answer-key file to write.
    #[arg(long)]
    pub answers_out: Option<String>,
}

impl PrepareArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(count) = self.count {
            config.prepare.count = count;
        }
        if !self.themes.is_empty() {
            config.prepare.themes = self.themes.clone();
        }
        if let Some(n) = self.max_retries {
            config.prepare.max_retries = n;
        }
        if let Some(ref path) = self.history {
            config.prepare.history_path = path.clone();
        }
        if let Some(ref path) = self.quiz_out {
            config.prepare.quiz = path.clone();
            config.validate.quiz = path.clone();
        }
        if let Some(ref path) = self.answers_out {
            config.prepare.answers = path.clone();
            config.validate.answers = path.clone();
        }
    }
}

/// Overrides for the `[validate]` section.
#[derive(Args, Debug, Default)]
pub(crate) struct ValidateArgs {
    /// Quiz file to read.
    #[arg(long)]
    pub quiz: Option<String>,

    /// Answer-key file to read.
    #[arg(long)]
    pub answers: Option<String>,

    /// JSON file for accepted questions.
    #[arg(short, long)]
    pub output: Option<String>,

    /// libSQL database for accepted questions.
    #[arg(long)]
    pub db: Option<String>,

    /// Extra asks when a verdict reply is not `True` or `False`.
    #[arg(long)]
    pub verdict_retries: Option<u32>,
}

impl ValidateArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ref path) = self.quiz {
            config.validate.quiz = path.clone();
        }
        if let Some(ref path) = self.answers {
            config.validate.answers = path.clone();
        }
        if let Some(ref path) = self.output {
            config.validate.output = path.clone();
        }
        if let Some(ref path) = self.db {
            config.validate.db_path = Some(path.clone());
        }
        if let Some(n) = self.verdict_retries {
            config.validate.verdict_retries = n;
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "quizforge=info",
        1 => "quizforge=debug",
        _ => "quizforge=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr; stdout carries chat and summaries.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Load the config file and apply global flag overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(ref model) = cli.model {
        config.llm.model = model.clone();
    }
    if let Some(ref url) = cli.llm_url {
        config.llm.url = url.clone();
    }
    if let Some(ref url) = cli.rag_url {
        config.retrieval.url = Some(url.clone());
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = resolve_config(&cli)?;

    match cli.command {
        Command::Prepare { prepare } => {
            prepare.apply(&mut config);
            validate_config(&config)?;
            cmd_prepare(&config).await
        }
        Command::Validate { validate } => {
            validate.apply(&mut config);
            validate_config(&config)?;
            cmd_validate(&config).await
        }
        Command::Run { prepare, validate } => {
            prepare.apply(&mut config);
            validate.apply(&mut config);
            validate_config(&config)?;
            cmd_run(&config).await
        }
        Command::Chat { window } => {
            if let Some(window) = window {
                config.chat.window = window;
            }
            validate_config(&config)?;
            cmd_chat(&config).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Completion client, retriever, and templates built from config.
struct Services {
    client: OllamaClient,
    retriever: Arc<dyn Retriever>,
    templates: Templates,
    params: CompletionParams,
    dumps: Arc<DumpSink>,
}

impl Services {
    fn from_config(config: &AppConfig) -> Result<Self> {
        let dumps = Arc::new(DumpSink::from_config(&config.debug));
        Ok(Self {
            client: OllamaClient::new(&config.llm, Arc::clone(&dumps))?,
            retriever: retriever_from_config(&config.retrieval)?,
            templates: Templates::from_config(&config.templates)?,
            params: CompletionParams::from_config(&config.llm),
            dumps,
        })
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(
            &self.client,
            self.retriever.as_ref(),
            &self.templates,
            self.params.clone(),
        )
    }
}

/// JSON sink always; relational sink when `validate.db_path` is set.
async fn build_sinks(config: &AppConfig) -> Result<Vec<Box<dyn ItemSink>>> {
    let mut sinks: Vec<Box<dyn ItemSink>> =
        vec![Box::new(JsonSink::new(&config.validate.output))];
    if let Some(ref db) = config.validate.db_path {
        sinks.push(Box::new(RelationalSink::open(db).await?));
    }
    Ok(sinks)
}

/// Await `work`, or stop early on Ctrl-C.
///
/// History is written per accepted item, so an interrupted batch leaves it
/// consistent.
async fn interruptible<F>(work: F) -> Result<Option<RunSummary>>
where
    F: std::future::Future<Output = quizforge_shared::Result<RunSummary>>,
{
    tokio::select! {
        result = work => Ok(Some(result?)),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping batch");
            Ok(None)
        }
    }
}

async fn cmd_prepare(config: &AppConfig) -> Result<ExitCode> {
    let services = Services::from_config(config)?;
    let mut history = FileHistory::open(&config.prepare.history_path)?;
    let reporter = CliProgress::new();

    info!(
        count = config.prepare.count,
        model = %config.llm.model,
        history = %history.path().display(),
        "preparing quiz"
    );

    let summary = interruptible(services.pipeline().prepare(
        PrepareOptions::from_config(config),
        &mut history,
        Path::new(&config.prepare.quiz),
        Path::new(&config.prepare.answers),
        &reporter,
    ))
    .await;
    reporter.finish();

    let Some(summary) = summary? else {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    };
    print_summary(&summary);
    println!("  Quiz:       {}", config.prepare.quiz);
    println!("  Answers:    {}", config.prepare.answers);
    println!();
    Ok(exit_code(&summary))
}

async fn cmd_validate(config: &AppConfig) -> Result<ExitCode> {
    let services = Services::from_config(config)?;
    let sinks = build_sinks(config).await?;
    let reporter = CliProgress::new();

    info!(quiz = %config.validate.quiz, sinks = sinks.len(), "validating quiz");

    let summary = interruptible(services.pipeline().validate(
        ValidateOptions::from_config(config),
        Path::new(&config.validate.quiz),
        Path::new(&config.validate.answers),
        &sinks,
        &reporter,
    ))
    .await;
    reporter.finish();

    let Some(summary) = summary? else {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    };
    print_summary(&summary);
    Ok(exit_code(&summary))
}

async fn cmd_run(config: &AppConfig) -> Result<ExitCode> {
    let services = Services::from_config(config)?;
    let mut history = FileHistory::open(&config.prepare.history_path)?;
    let sinks = build_sinks(config).await?;
    let reporter = CliProgress::new();

    info!(
        count = config.prepare.count,
        model = %config.llm.model,
        sinks = sinks.len(),
        "running prepare and validate"
    );

    let summary = interruptible(services.pipeline().run(
        PrepareOptions::from_config(config),
        ValidateOptions::from_config(config),
        &mut history,
        Path::new(&config.prepare.quiz),
        Path::new(&config.prepare.answers),
        &sinks,
        &reporter,
    ))
    .await;
    reporter.finish();

    let Some(summary) = summary? else {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    };
    print_summary(&summary);
    Ok(exit_code(&summary))
}

async fn cmd_chat(config: &AppConfig) -> Result<ExitCode> {
    let services = Services::from_config(config)?;
    let params = services.params.clone().with_temperature(config.chat.temperature);
    let mut session = ChatSession::new(
        &services.client,
        services.retriever.as_ref(),
        &services.templates,
        params,
        ChatOptions::from_config(config),
        Arc::clone(&services.dumps),
    );

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    tokio::select! {
        result = run_repl(&mut session, input, output) => {
            result?;
            Ok(ExitCode::SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(config: &AppConfig) -> Result<ExitCode> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Summary output
// ---------------------------------------------------------------------------

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Generated:  {}", summary.generated);
    println!("  Failed:     {} slot(s), {} item(s)", summary.failed_slots, summary.failed_items);
    println!("  Accepted:   {}", summary.accepted);
    println!("  Dropped:    {}", summary.dropped);
    if summary.verdict_parse_failures > 0 {
        println!("  Unparsable verdicts: {}", summary.verdict_parse_failures);
    }
    for sink in &summary.sinks {
        match &sink.result {
            Ok(n) => println!("  Sink {:<11} {n} written", format!("{}:", sink.sink)),
            Err(e) => println!("  Sink {:<11} FAILED ({e})", format!("{}:", sink.sink)),
        }
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

/// 0 when the batch finished clean, 1 when any slot, item, or sink failed.
fn exit_status(summary: &RunSummary) -> u8 {
    u8::from(!summary.is_clean())
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    ExitCode::from(exit_status(summary))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn task_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_both_sections() {
        let cli = Cli::try_parse_from([
            "quizforge",
            "--model",
            "llama3",
            "run",
            "-n",
            "5",
            "--theme",
            "ownership",
            "--theme",
            "traits",
            "--quiz-out",
            "out/quiz.json",
            "--db",
            "quiz.db",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        config.llm.model = cli.model.clone().unwrap();
        let Command::Run { prepare, validate } = cli.command else {
            panic!("expected run");
        };
        prepare.apply(&mut config);
        validate.apply(&mut config);

        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.prepare.count, 5);
        assert_eq!(config.prepare.themes, vec!["ownership", "traits"]);
        assert_eq!(config.validate.quiz, "out/quiz.json");
        assert_eq!(config.validate.db_path.as_deref(), Some("quiz.db"));
    }

    #[test]
    fn summary_exit_codes() {
        assert_eq!(exit_status(&RunSummary::default()), 0);
        let failed = RunSummary {
            failed_slots: 1,
            ..Default::default()
        };
        assert_eq!(exit_status(&failed), 1);
        let dropped_only = RunSummary {
            dropped: 3,
            ..Default::default()
        };
        assert_eq!(exit_status(&dropped_only), 0);
    }
}
