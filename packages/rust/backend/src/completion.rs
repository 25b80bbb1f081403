//! Completion backend client.
//!
//! [`CompletionBackend`] is the seam the engines call through; [`OllamaClient`]
//! implements it over HTTP against an Ollama-style `/api/generate` endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument};

use quizforge_shared::{LlmConfig, QuizError, Result};

use crate::dump::DumpSink;
use crate::retry::{RetryPolicy, with_transport_retry};

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("QuizForge/", env!("CARGO_PKG_VERSION"));

/// Per-call model and sampling parameters.
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub num_predict: Option<u32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub keep_alive: Option<String>,
    /// Slot index, for log lines only.
    pub iteration: Option<usize>,
    /// Topic hint, for log lines only.
    pub theme: Option<String>,
}

impl CompletionParams {
    /// Parameters taken from the `[llm]` config section.
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            num_predict: llm.num_predict,
            top_k: llm.top_k,
            top_p: llm.top_p,
            keep_alive: llm.keep_alive.clone(),
            iteration: None,
            theme: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        let theme = theme.into();
        self.theme = (!theme.is_empty()).then_some(theme);
        self
    }
}

/// A text-completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete `prompt`, returning the generated text.
    ///
    /// Fails only with [`QuizError::Transport`] once the transport budget is spent.
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Default, Serialize)]
struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

// ---------------------------------------------------------------------------
// OllamaClient
// ---------------------------------------------------------------------------

/// HTTP completion client with transport retry and optional debug dumps.
pub struct OllamaClient {
    client: Client,
    url: String,
    retry: RetryPolicy,
    dumps: Arc<DumpSink>,
}

impl OllamaClient {
    /// Build a client from the `[llm]` config section.
    pub fn new(llm: &LlmConfig, dumps: Arc<DumpSink>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(llm.http_timeout_secs))
            .build()
            .map_err(|e| QuizError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: llm.url.clone(),
            retry: RetryPolicy::from_config(llm),
            dumps,
        })
    }

    /// Replace the transport retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One HTTP round trip. Every failure mode is a transport failure.
    async fn send_once(&self, body: &serde_json::Value) -> std::result::Result<String, String> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request timed out: {e}")
                } else {
                    format!("request failed: {e}")
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read response body: {e}"))?;

        if !status.is_success() {
            return Err(format!("HTTP {status}: {}", preview(&text)));
        }

        let data: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| format!("malformed response JSON: {e} (got: {})", preview(&text)))?;
        self.dumps.record_response(&data);

        data.get("response")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| "response JSON has no string `response` field".to_string())
    }
}

/// First 200 characters of a response body, for error messages.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl CompletionBackend for OllamaClient {
    #[instrument(skip_all, fields(model = %params.model))]
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let request = GenerateRequest {
            model: &params.model,
            prompt,
            stream: false,
            options: SamplingOptions {
                temperature: params.temperature,
                num_predict: params.num_predict,
                top_k: params.top_k,
                top_p: params.top_p,
            },
            keep_alive: params.keep_alive.as_deref(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| QuizError::transport(0, format!("failed to serialize request: {e}")))?;

        self.dumps.record_prompt(prompt);
        self.dumps.record_payload(&body);
        debug!(prompt_chars = prompt.len(), "sending completion request");

        let start = Instant::now();
        let text = with_transport_retry(&self.retry, |_| self.send_once(&body)).await?;

        info!(
            iteration = params.iteration.map(|i| i + 1),
            theme = params.theme.as_deref().unwrap_or(""),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "completion received"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizforge_shared::{BackoffConfig, BackoffPolicy};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm_config(server: &MockServer, retries: u32) -> LlmConfig {
        LlmConfig {
            url: format!("{}/api/generate", server.uri()),
            llm_retries: retries,
            http_timeout_secs: 5,
            backoff: BackoffConfig {
                policy: BackoffPolicy::Fixed,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..Default::default()
        }
    }

    fn client(config: &LlmConfig) -> OllamaClient {
        OllamaClient::new(config, Arc::new(DumpSink::disabled())).expect("client")
    }

    #[tokio::test]
    async fn returns_response_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral",
                "prompt": "Say hi",
                "stream": false,
                "keep_alive": "5m"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"model": "mistral", "response": "hi", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = llm_config(&server, 3);
        let params = CompletionParams::from_config(&config).with_temperature(0.4);
        let text = client(&config).complete("Say hi", &params).await.unwrap();
        assert_eq!(text, "hi");
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let config = llm_config(&server, 3);
        let text = client(&config)
            .complete("p", &CompletionParams::from_config(&config))
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let config = llm_config(&server, 3);
        let err = client(&config)
            .complete("p", &CompletionParams::from_config(&config))
            .await
            .unwrap_err();
        match err {
            QuizError::Transport { attempts, message } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("500"));
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .expect(2)
            .mount(&server)
            .await;

        let config = llm_config(&server, 2);
        let err = client(&config)
            .complete("p", &CompletionParams::from_config(&config))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Transport { attempts: 2, .. }));
        assert!(err.to_string().contains("malformed response JSON"));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9/api/generate".into(),
            llm_retries: 1,
            http_timeout_secs: 2,
            ..Default::default()
        };
        let err = client(&config)
            .complete("p", &CompletionParams::from_config(&config))
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Transport { attempts: 1, .. }));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn empty_theme_is_dropped() {
        let params = CompletionParams::default().with_theme("");
        assert!(params.theme.is_none());
        let params = CompletionParams::default().with_theme("traits");
        assert_eq!(params.theme.as_deref(), Some("traits"));
    }
}
