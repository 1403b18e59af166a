//! Text-generation provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - Google Gemini API (Gemini models)
//! - OpenAI-compatible APIs (OpenAI, Azure, Ollama, vLLM, LM Studio)
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod gemini;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::GenerationError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `GenerationError::RateLimited` (respects `retry_after_secs`),
/// `GenerationError::Connection`, and `GenerationError::Timeout`. Permanent errors
/// (auth, parse, bad request) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, GenerationError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &GenerationError) -> bool {
    matches!(
        err,
        GenerationError::RateLimited { .. }
            | GenerationError::Connection { .. }
            | GenerationError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &GenerationError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let GenerationError::RateLimited { retry_after_secs } = err {
        return retry_after_secs
            .saturating_mul(1000)
            .max(computed)
            .min(config.max_backoff_ms);
    }
    computed
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    base.min(config.max_backoff_ms as f64) as u64
}

/// Map a reqwest transport failure onto the generation error taxonomy.
pub(crate) fn map_send_error(err: reqwest::Error, timeout_secs: u64) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout { timeout_secs }
    } else if err.is_connect() {
        GenerationError::Connection {
            message: err.to_string(),
        }
    } else {
        GenerationError::ApiRequest {
            message: format!("Request failed: {}", err),
        }
    }
}

/// Build the shared HTTP client for a provider.
pub(crate) fn build_client(config: &LlmConfig) -> Result<reqwest::Client, GenerationError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GenerationError::Connection {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

/// Create a provider based on the configuration.
///
/// Routes to the appropriate provider implementation:
/// - `"gemini"` → `GeminiProvider`
/// - `"openai"` → `OpenAiCompatibleProvider`
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, GenerationError> {
    let api_key = config
        .resolve_api_key()
        .map_err(|e| GenerationError::AuthFailed {
            provider: format!("{} ({})", config.provider, e),
        })?;
    create_provider_with_key(config, api_key)
}

/// Create a provider using a pre-resolved API key.
pub fn create_provider_with_key(
    config: &LlmConfig,
    api_key: String,
) -> Result<Arc<dyn LlmProvider>, GenerationError> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new_with_key(config, api_key)?)),
        "openai" => Ok(Arc::new(OpenAiCompatibleProvider::new_with_key(
            config, api_key,
        )?)),
        other => Err(GenerationError::UnknownProvider {
            provider: other.to_string(),
        }),
    }
}
