//! Text Generation Client
//!
//! Chat-completions client for the DeepSeek API (and any endpoint that
//! speaks the same envelope). The envelope is trusted JSON; the generated
//! text inside it is not.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::GeneratorConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Unauthorized: credential rejected by the generation API")]
    Unauthorized,

    #[error("Rate limited by the generation API")]
    RateLimited,

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Completion contained no text")]
    EmptyCompletion,

    #[error("Completion opened a code block that was never closed")]
    UnterminatedFence,

    #[error("Completion contained no query")]
    EmptyQuery,
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Prompt in, text out. Network-fallible and untrusted.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, credential: &str) -> Result<String>;
}

/// DeepSeek chat-completions client
pub struct DeepSeekClient {
    client: Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
}

impl DeepSeekClient {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for DeepSeekClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn complete(&self, prompt: &str, credential: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation API responded"
        );

        match status {
            s if s.is_success() => parse_completion(&body),
            StatusCode::UNAUTHORIZED => Err(GenerationError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(GenerationError::RateLimited),
            s => {
                warn!(status = s.as_u16(), "Generation API returned an error");
                Err(GenerationError::Api {
                    status: s.as_u16(),
                    body: truncate(&body, 512),
                })
            }
        }
    }
}

impl DeepSeekClient {
    fn transport_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else {
            GenerationError::Http(err)
        }
    }
}

/// Read `choices[0].message.content` out of a chat-completions body
pub fn parse_completion(body: &str) -> Result<String> {
    let envelope: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedEnvelope(e.to_string()))?;

    let content = envelope
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::MalformedEnvelope("no choices".to_string()))?
        .message
        .content
        .ok_or_else(|| GenerationError::MalformedEnvelope("choice has no content".to_string()))?;

    if content.trim().is_empty() {
        return Err(GenerationError::EmptyCompletion);
    }
    Ok(content)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
