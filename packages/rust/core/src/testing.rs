//! Scripted fakes for engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use quizforge_backend::{CompletionBackend, CompletionParams, Retriever, Snippet};
use quizforge_shared::{QuizError, Result};

/// Replays canned completions in order and records every prompt it sees.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String>>>,
    pub prompts: Mutex<Vec<String>>,
    pub params: Mutex<Vec<CompletionParams>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        for r in replies {
            backend.push_ok(r);
        }
        backend
    }

    pub fn push_ok(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn push_transport_error(&self, attempts: u32) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(QuizError::transport(attempts, "HTTP 503: unavailable")));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.params.lock().unwrap().push(params.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(QuizError::transport(1, "script exhausted")))
    }
}

/// Returns the same snippets for every query, or fails every query.
#[derive(Default)]
pub struct FixedRetriever {
    snippets: Vec<Snippet>,
    fail: bool,
    pub queries: Mutex<Vec<String>>,
}

impl FixedRetriever {
    pub fn with(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn query(&self, text: &str, _k: usize) -> Result<Vec<Snippet>> {
        self.queries.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(QuizError::Retrieval("connection refused".into()));
        }
        Ok(self.snippets.clone())
    }
}

/// A well-formed generation reply for `question`.
pub fn question_json(question: &str) -> String {
    serde_json::json!({
        "question": question,
        "options": ["Alpha", "Beta", "Gamma", "Delta"],
        "answer": "Beta",
        "explanation": "Beta is right.",
        "topic": "greek",
        "difficulty": "easy"
    })
    .to_string()
}
