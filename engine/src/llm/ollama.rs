//! Ollama LLM Provider
//!
//! Talks to an Ollama-compatible `/api/chat` endpoint, typically a local
//! server at http://localhost:11434. Rate limits, server errors, refused
//! connections and timeouts are reported as transient failures; anything else
//! (bad request, unknown model, undecodable body) aborts the iteration.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sdk::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{LLMProvider, LLMResponse, Message, TokenUsage};
use crate::config::LLMConfig;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for the Ollama API, without trailing slash
    base_url: String,

    /// Model name to use (e.g., "qwen2.5-coder:7b")
    model: String,

    client: Client,
}

impl OllamaProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    pub fn from_config(config: &LLMConfig, timeout: Duration) -> Result<Self> {
        Self::new(&config.base_url, &config.model, timeout)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn map_send_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::LLMTimeout
        } else if e.is_connect() {
            EngineError::llm_transient(format!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.base_url
            ))
        } else {
            EngineError::llm_transient(format!("Request to Ollama failed: {}", e))
        }
    }
}

/// Rate limits and server-side failures may clear up on retry
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, messages: &[Message]) -> Result<LLMResponse> {
        let ollama_messages = self.convert_messages(messages);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            self.model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("Ollama API error ({}): {}", status, error_text.trim());
            return Err(if is_retryable_status(status) {
                EngineError::llm_transient(message)
            } else {
                EngineError::llm_fatal(message)
            });
        }

        let body: OllamaResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::LLMTimeout
            } else {
                EngineError::llm_fatal(format!("Failed to parse Ollama response: {}", e))
            }
        })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage {
                prompt_tokens: prompt.unwrap_or(0),
                completion_tokens: completion.unwrap_or(0),
            }),
        };

        Ok(LLMResponse::from_content(body.message.content, usage))
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion() {
        let provider =
            OllamaProvider::new("http://localhost:11434/", "llama3.1:8b", Duration::from_secs(5))
                .unwrap();

        let messages = vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello"),
            Message::assistant("Hi there"),
        ];
        let converted = provider.convert_messages(&messages);

        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[2].role, "assistant");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }
}
