//! # Bloodwork Core
//!
//! Core library for bloodwork: turns a blood-test report into sourced,
//! personalized health recommendations and mails them to the report owner.
//! Provides text extraction, issue identification, web discovery,
//! recommendation synthesis, delivery, configuration, and the pipeline that
//! threads them together.

pub mod brain;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod identify;
pub mod pipeline;
pub mod providers;
pub mod synthesize;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{CompletionRequest, CompletionResponse, LlmProvider, MockLlmProvider};
pub use config::{PipelineConfig, load_config};
pub use discovery::{GoogleSearch, SearchEngine, WebDiscovery};
pub use dispatch::{Dispatcher, MailSession, MailTransport, OutgoingMail, SmtpTransport};
pub use error::{
    BloodworkError, ConfigError, DeliveryError, DiscoveryError, ExtractionError, FetchError,
    GenerationError, Result,
};
pub use extract::{DocumentTextExtractor, TextExtractor};
pub use fetch::{FetchedPage, HttpPageFetcher, PageFetcher};
pub use identify::IssueIdentifier;
pub use pipeline::{Pipeline, PipelineOutcome, Services};
pub use synthesize::RecommendationSynthesizer;
pub use types::{
    Address, ArticleContent, CandidateLink, DispatchResult, ExtractedText, HealthIssue,
    RawDocument, RecommendationReport, ReportKind,
};
