//! Text-generation interface.
//!
//! The pipeline talks to the generation service through the [`LlmProvider`]
//! trait: one stateless request in, one block of generated text out. Concrete
//! providers live in [`crate::providers`].

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Represents a participant role in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single text message in a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }
}

/// A single call to the generation service. No conversation state survives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: f32,
    /// Per-request model override; providers fall back to their configured model.
    pub model: Option<String>,
}

impl CompletionRequest {
    /// A request carrying one user prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            max_tokens: None,
            temperature: 0.4,
            model: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Concatenated text of every user message.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Token accounting reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Generated text plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Trait for text-generation providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, GenerationError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A scripted provider for tests.
///
/// Returns queued responses in order; once the queue is empty it repeats the
/// fallback response, if one was set, or fails with `GenerationError::ApiRequest`.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<String, String>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: Some(text.to_string()),
            ..Self::new()
        }
    }

    /// Create a provider whose every call fails.
    pub fn failing() -> Self {
        Self::new()
    }

    /// Queue a text response for the next unanswered `complete` call.
    pub fn queue_response(&self, text: &str) {
        self.responses.lock().unwrap().push(Ok(text.to_string()));
    }

    /// Queue a failure for the next unanswered `complete` call.
    pub fn queue_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push(Err(message.to_string()));
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User text of every request received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.user_text());

        let queued = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };

        match queued {
            Some(Ok(text)) => Ok(Self::text_response(&text)),
            Some(Err(message)) => Err(GenerationError::ApiRequest { message }),
            None => match &self.fallback {
                Some(text) => Ok(Self::text_response(text)),
                None => Err(GenerationError::ApiRequest {
                    message: "mock provider has no response queued".to_string(),
                }),
            },
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_request() {
        let req = CompletionRequest::prompt("hello")
            .with_max_tokens(256)
            .with_temperature(0.1);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.max_tokens, Some(256));
        assert!((req.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(req.user_text(), "hello");
    }

    #[test]
    fn test_user_text_skips_system() {
        let req = CompletionRequest {
            messages: vec![Message::system("be terse"), Message::user("question")],
            max_tokens: None,
            temperature: 0.0,
            model: None,
        };
        assert_eq!(req.user_text(), "question");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[tokio::test]
    async fn test_mock_queue_then_fallback() {
        let mock = MockLlmProvider::with_response("fallback");
        mock.queue_response("first");
        mock.queue_error("boom");

        let r1 = mock.complete(CompletionRequest::prompt("a")).await.unwrap();
        assert_eq!(r1.text, "first");
        let r2 = mock.complete(CompletionRequest::prompt("b")).await;
        assert!(matches!(r2, Err(GenerationError::ApiRequest { .. })));
        let r3 = mock.complete(CompletionRequest::prompt("c")).await.unwrap();
        assert_eq!(r3.text, "fallback");

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let mock = MockLlmProvider::failing();
        assert!(mock.complete(CompletionRequest::prompt("x")).await.is_err());
        assert_eq!(mock.model_name(), "mock-model");
    }
}
