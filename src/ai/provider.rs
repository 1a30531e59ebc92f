use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::Token;
use crate::config::ProviderConfig;

const ERROR_BODY_LIMIT: usize = 300;

/// Failure of a single provider call. The gateway treats every variant the
/// same way: log it and move on to the next provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("missing API key (set {0})")]
    MissingApiKey(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("provider returned no text")]
    EmptyOutput,
}

/// A language model endpoint that turns a prompt into text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier recorded on analyses and patches.
    fn name(&self) -> &str;

    /// Sends one completion request at temperature 0.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .user_agent(concat!("pipefix/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    Err(ProviderError::Status {
        status: status.as_u16(),
        body: super::truncate_chars(&body, ERROR_BODY_LIMIT).to_string(),
    })
}

fn non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::EmptyOutput)
    } else {
        Ok(text)
    }
}

/// OpenAI-compatible `/chat/completions` endpoint (DeepSeek, OpenRouter, ...).
pub struct ChatCompletionsProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: Token,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(config: &ProviderConfig, api_key: Token, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            name: config.name.clone(),
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Provider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        debug!("[{}] prompt size: {} chars", self.name, prompt.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.as_str())
            .json(&json!({
                "model": self.model,
                "temperature": 0,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": prompt }
                ]
            }))
            .send()
            .await?;

        let parsed: ChatCompletionsResponse = error_for_status(response).await?.json().await?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();

        non_empty(text)
    }
}

/// Google Gemini `generateContent` endpoint.
pub struct GeminiProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: Token,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig, api_key: Token, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            name: config.name.clone(),
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        debug!("[{}] prompt size: {} chars", self.name, prompt.len());

        // The v1 endpoint has no separate system slot, so the framing leads the prompt.
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": format!("{system}\n\n{prompt}") }] }
                ],
                "generationConfig": { "temperature": 0 }
            }))
            .send()
            .await?;

        let parsed: GeminiResponse = error_for_status(response).await?.json().await?;

        let text = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<String>();

        non_empty(text)
    }
}
