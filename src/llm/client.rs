//! Clients for the hosted extraction model.
//!
//! Both providers take the instruction prompt plus document text as a single
//! user message and return the model's text reply. There is no retry here;
//! the caller decides what a failure means.

use crate::config::{ModelConfig, Provider};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// A text-in/text-out model used for extraction.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Send `prompt` and return the reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Name reported in logs.
    fn model_name(&self) -> &str;
}

/// Build the client selected by the configuration.
pub fn build_model(config: &ModelConfig) -> Result<Box<dyn ExtractionModel>> {
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .context("Failed to create HTTP client")?;

    info!(
        "Using {:?} model {} at {}",
        config.provider,
        config.name,
        config.base_url()
    );

    match config.provider {
        Provider::Anthropic => {
            let api_key = config
                .resolved_api_key()
                .ok_or_else(|| anyhow!("No API key configured. Set ANTHROPIC_API_KEY or model.api_key"))?;
            Ok(Box::new(AnthropicClient {
                http_client,
                base_url: config.base_url(),
                api_key,
                model: config.name.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                timeout_seconds: config.timeout_seconds,
            }))
        }
        Provider::Ollama => Ok(Box::new(OllamaClient {
            http_client,
            base_url: config.base_url(),
            model: config.name.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
        })),
    }
}

/// Map a transport error to a readable message.
fn describe_send_error(e: reqwest::Error, base_url: &str, timeout_seconds: u64) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("Request timed out after {}s", timeout_seconds)
    } else if e.is_connect() {
        anyhow!("Cannot connect to model API at {}", base_url)
    } else {
        anyhow!("Failed to send request: {}", e)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicResponse {
    /// Text of the first content block, or empty when it is not text.
    fn first_text(self) -> String {
        self.content
            .into_iter()
            .next()
            .filter(|c| c.kind == "text")
            .and_then(|c| c.text)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExtractionModel for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);

        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![ChatMessage::user(prompt)],
        };

        debug!("Sending extraction request ({} chars)", prompt.len());

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| describe_send_error(e, &self.base_url, self.timeout_seconds))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error {}: {}", status, body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        Ok(parsed.first_text())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Ollama chat API client.
pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl ExtractionModel for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![ChatMessage::user(prompt)],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| describe_send_error(e, &self.base_url, self.timeout_seconds))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
