//! OpenAI-compatible provider implementation.
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol:
//! OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio.

use crate::brain::{CompletionRequest, CompletionResponse, LlmProvider, Message, TokenUsage};
use crate::config::{LlmConfig, RetryConfig};
use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Provider for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|_| GenerationError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible (env var '{}' not set)",
                    config.api_key_env
                ),
            })?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, GenerationError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: super::build_client(config)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            retry: config.retry.clone(),
        })
    }

    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.text}))
            .collect()
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": false,
        })
    }

    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, GenerationError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let message = choice
            .get("message")
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as usize,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            usage,
            model: body
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(|s| s.to_string()),
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                GenerationError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 20s."
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<u64>()
                                .ok()
                        })
                    })
                    .unwrap_or(5);
                GenerationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            _ => GenerationError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn complete_once(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<CompletionResponse, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| super::map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| GenerationError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| GenerationError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        super::with_retry(&self.retry, || self.complete_once(&url, &body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
