//! Client for an OpenAI-compatible completion endpoint (LM Studio, Ollama).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LlmSection;
use crate::errors::LlmError;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout_seconds: u64,
}

impl LlmClient {
    pub fn new(config: &LlmSection) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_seconds: config.timeout_seconds,
        }
    }

    /// Send one completion request and return the response text.
    pub async fn complete(&self, prompt: &str, temperature: Option<f64>) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: temperature.unwrap_or(self.temperature),
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(Duration::from_secs(self.timeout_seconds))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        seconds: self.timeout_seconds,
                    }
                } else {
                    LlmError::Unreachable(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::BadShape(format!("invalid response body: {}", e)))?;

        let content = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::BadShape("no choices in response".to_string()))?
            .message
            .content;

        if content.is_empty() {
            return Err(LlmError::BadShape("empty completion content".to_string()));
        }
        Ok(content)
    }

    /// Cheap reachability probe against the model listing endpoint.
    pub async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }
}
