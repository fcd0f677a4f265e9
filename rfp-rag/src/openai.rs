//! OpenAI-compatible chat-completions client shared by the generation and
//! judge backends.
//!
//! This module is only available when the `openai` feature is enabled.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const BACKEND: &str = "openai";

/// A minimal client for the `/chat/completions` endpoint.
///
/// Each call is retried according to its [`RetryPolicy`]: transport errors,
/// timeouts, HTTP 429 and 5xx are transient; any other non-success status
/// fails immediately.
///
/// # Example
///
/// ```rust,ignore
/// use rfp_rag::openai::OpenAiChatClient;
///
/// let client = OpenAiChatClient::new("sk-...", "gpt-4o-mini")?;
/// let reply = client.complete(Some("You are terse."), "Say hi").await?;
/// ```
#[derive(Clone)]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl OpenAiChatClient {
    /// Create a client for `model` with the given API key.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is empty.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("OPENAI_API_KEY must not be empty".into()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: model.into(),
            temperature: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Set the API base URL (for OpenAI-compatible servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the sampling temperature. Left unset, the server default applies.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one chat completion and return the assistant's text.
    ///
    /// # Errors
    ///
    /// - [`RagError::BackendUnavailable`] once transient failures exhaust the
    ///   retry budget.
    /// - [`RagError::ConfigError`] if the server rejects the request
    ///   (bad key, unknown model, invalid parameters).
    /// - [`RagError::MalformedResponse`] if the reply has no text content.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: user });
        let request = ChatRequest { model: &self.model, messages, temperature: self.temperature };

        self.retry.run(BACKEND, || self.send(&request)).await
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String> {
        debug!(provider = BACKEND, model = %self.model, "sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(provider = BACKEND, error = %e, "request failed");
                RagError::BackendUnavailable {
                    backend: BACKEND.into(),
                    message: format!("request failed: {e}"),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(provider = BACKEND, %status, "API error");
            return Err(status_error(status, &detail));
        }

        let body = response.text().await.map_err(|e| RagError::BackendUnavailable {
            backend: BACKEND.into(),
            message: format!("failed to read response body: {e}"),
        })?;
        parse_completion(&body)
    }
}

/// Map a non-success HTTP status to a retryable or permanent error.
fn status_error(status: StatusCode, detail: &str) -> RagError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RagError::BackendUnavailable {
            backend: BACKEND.into(),
            message: format!("API returned {status}: {detail}"),
        }
    } else {
        RagError::ConfigError(format!("{BACKEND} rejected the request ({status}): {detail}"))
    }
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        RagError::MalformedResponse {
            backend: BACKEND.into(),
            message: format!("failed to parse response: {e}"),
        }
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| RagError::MalformedResponse {
            backend: BACKEND.into(),
            message: "completion contained no text".into(),
        })
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
