//! Google Gemini API provider implementation.
//!
//! Implements the `LlmProvider` trait for the native Google Gemini API.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - System instruction is a top-level `system_instruction` field
//! - Roles are `"user"` / `"model"` (not `"assistant"`)

use crate::brain::{CompletionRequest, CompletionResponse, LlmProvider, Message, Role, TokenUsage};
use crate::config::{LlmConfig, RetryConfig};
use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// Resolves the API key from `config.api_key` or the variable named by `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|_| GenerationError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new Gemini provider with an explicitly provided API key.
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

    /// Build the JSON request body for the Gemini API.
    ///
    /// System messages become the top-level `system_instruction`; everything else
    /// goes into `contents`.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);

        let (system_text, non_system) = Self::extract_system_instruction(&request.messages);

        let contents: Vec<Value> = non_system
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{"text": msg.text}],
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": request.temperature,
            },
        });

        if let Some(system) = &system_text {
            body["system_instruction"] = serde_json::json!({
                "parts": [{"text": system}]
            });
        }

        body
    }

    /// Split system messages from the rest.
    fn extract_system_instruction(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            if msg.role == Role::System {
                system_parts.push(&msg.text);
            } else {
                non_system.push(msg);
            }
        }

        let system_text = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system_text, non_system)
    }

    /// Parse a Gemini API response JSON into a `CompletionResponse`.
    ///
    /// Concatenates the text of every part of the first candidate.
    fn parse_response(body: &Value) -> Result<CompletionResponse, GenerationError> {
        let candidates =
            body["candidates"]
                .as_array()
                .ok_or_else(|| GenerationError::ResponseParse {
                    message: "Missing 'candidates' array in response".to_string(),
                })?;

        let candidate = candidates
            .first()
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "Empty 'candidates' array in response".to_string(),
            })?;

        let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
            GenerationError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            }
        })?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");

        let usage_metadata = &body["usageMetadata"];
        let usage = TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        };

        Ok(CompletionResponse {
            text,
            usage,
            model: body["modelVersion"]
                .as_str()
                .unwrap_or("gemini")
                .to_string(),
            finish_reason: candidate["finishReason"].as_str().map(|s| s.to_string()),
        })
    }

    /// Map an HTTP status code to the appropriate `GenerationError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => GenerationError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => GenerationError::RateLimited {
                retry_after_secs: 30,
            },
            _ => GenerationError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    /// Build the endpoint URL for a Gemini API call.
    fn endpoint_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    async fn complete_once(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<CompletionResponse, GenerationError> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| super::map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| GenerationError::ResponseParse {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| GenerationError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, GenerationError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(model, "generateContent");

        debug!(model = model, "Sending Gemini completion request");

        super::with_retry(&self.retry, || self.complete_once(&url, &body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
