//! Error types for the bloodwork pipeline.
//!
//! Uses `thiserror` for public API error types. Each pipeline stage has its own
//! error enum; only [`ExtractionError`] is fatal; the others are absorbed by the
//! stage that produced them and degrade the data handed to later stages.

use std::path::PathBuf;

/// Top-level error type for the bloodwork core library.
#[derive(Debug, thiserror::Error)]
pub enum BloodworkError {
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors turning a raw document into text. Fatal to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Document is empty")]
    EmptyDocument,

    #[error("Unsupported document format: {detail}")]
    UnsupportedFormat { detail: String },

    #[error("Failed to parse document: {message}")]
    Parse { message: String },
}

/// Errors from the text-generation service.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },
}

/// Errors performing a web search for one issue.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search returned HTTP {status}")]
    Status { status: u16 },

    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },
}

/// Errors fetching a single page.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': must start with http:// or https://")]
    InvalidUrl { url: String },

    #[error("Fetch of {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} for URL: {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },
}

/// Errors delivering the report by mail.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to open mail session: {message}")]
    Connect { message: String },

    #[error("Mail authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("Failed to send mail: {message}")]
    SendFailed { message: String },

    #[error("Failed to build message: {message}")]
    Build { message: String },

    #[error("Mail session is closed")]
    SessionClosed,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `BloodworkError`.
pub type Result<T> = std::result::Result<T, BloodworkError>;
