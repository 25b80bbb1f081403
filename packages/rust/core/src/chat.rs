//! Interactive chat over the knowledge base with a sliding turn window.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use quizforge_backend::{CompletionBackend, CompletionParams, DumpSink, Retriever, render_context};
use quizforge_shared::{AppConfig, QuizError, Result};

use crate::template::{TemplateId, Templates, Variables};

/// Lines that end the REPL.
const EXIT_COMMANDS: [&str; 6] = ["exit", "quit", "/exit", "/quit", ":q", ":wq"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

/// Settings for a chat session.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Turns kept in the window; user and assistant turns both count.
    pub window: usize,
    pub rag_k: usize,
    pub snippet_chars: usize,
}

impl ChatOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            window: config.chat.window.max(1),
            rag_k: config.retrieval.k,
            snippet_chars: config.retrieval.snippet_chars,
        }
    }
}

/// One conversation. Lives as long as the process.
pub struct ChatSession<'a> {
    backend: &'a dyn CompletionBackend,
    retriever: &'a dyn Retriever,
    templates: &'a Templates,
    params: CompletionParams,
    options: ChatOptions,
    dumps: Arc<DumpSink>,
    window: VecDeque<ChatTurn>,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        backend: &'a dyn CompletionBackend,
        retriever: &'a dyn Retriever,
        templates: &'a Templates,
        params: CompletionParams,
        options: ChatOptions,
        dumps: Arc<DumpSink>,
    ) -> Self {
        Self {
            backend,
            retriever,
            templates,
            params,
            window: VecDeque::with_capacity(options.window + 2),
            options,
            dumps,
        }
    }

    pub fn window(&self) -> &VecDeque<ChatTurn> {
        &self.window
    }

    /// Answer `user_text` and add the exchange to the window.
    pub async fn turn(&mut self, user_text: &str) -> Result<String> {
        let question = user_text.trim();
        let context = match self.retriever.query(question, self.options.rag_k).await {
            Ok(snippets) => render_context(question, &snippets, self.options.snippet_chars),
            Err(e) => {
                warn!(error = %e, "retrieval failed, answering without context");
                String::new()
            }
        };

        let vars = Variables::from([
            ("context_section", chat_context_section(&context)),
            ("history", self.render_history()),
            ("question", question.to_string()),
        ]);
        let prompt = self.templates.render(TemplateId::Chat, &vars)?;

        if self.dumps.payload_enabled() {
            self.dumps.record_payload(&serde_json::json!({
                "type": "chat_debug",
                "chat_window": self.window,
            }));
        }

        let reply = self.backend.complete(&prompt, &self.params).await?;
        let answer = reply.trim().to_string();

        self.push(Role::User, question);
        self.push(Role::Assistant, &answer);
        debug!(window = self.window.len(), "chat turn complete");
        Ok(answer)
    }

    fn push(&mut self, role: Role, text: &str) {
        self.window.push_back(ChatTurn {
            role,
            text: text.to_string(),
        });
        while self.window.len() > self.options.window {
            self.window.pop_front();
        }
    }

    fn render_history(&self) -> String {
        self.window
            .iter()
            .map(|t| format!("{}: {}", t.role.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn chat_context_section(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!("# FILE: RAG_CONTEXT.md\n{context}\n")
    }
}

/// Whether `line` asks to leave the REPL.
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim().to_lowercase();
    EXIT_COMMANDS.contains(&line.as_str())
}

/// Read questions from `input` until EOF or an exit command, writing answers
/// to `output`. Transport failures are reported and the loop continues.
pub async fn run_repl<R, W>(session: &mut ChatSession<'_>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| QuizError::io("<chat stdio>", e);
    let mut lines = input.lines();

    info!(window = session.options.window, "chat started");
    loop {
        output.write_all(b"You ('exit' to quit): ").await.map_err(io_err)?;
        output.flush().await.map_err(io_err)?;

        let Some(line) = lines.next_line().await.map_err(io_err)? else {
            output.write_all(b"\n").await.map_err(io_err)?;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit_command(line) {
            break;
        }

        match session.turn(line).await {
            Ok(answer) => {
                output
                    .write_all(format!("Assistant: {answer}\n").as_bytes())
                    .await
                    .map_err(io_err)?;
            }
            Err(e @ QuizError::Transport { .. }) | Err(e @ QuizError::Retrieval(_)) => {
                warn!(error = %e, "chat turn failed");
                output
                    .write_all(format!("[error] {e}\n").as_bytes())
                    .await
                    .map_err(io_err)?;
            }
            Err(e) => return Err(e),
        }
    }
    output.flush().await.map_err(io_err)?;
    info!("chat ended");
    Ok(())
}
