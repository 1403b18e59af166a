//! The orchestrator: extraction → identification → discovery → synthesis → dispatch.
//!
//! Stages are awaited strictly in sequence and each one's output is the next
//! one's only input. Only extraction can fail the run; every later stage
//! degrades its output instead.

use crate::brain::LlmProvider;
use crate::config::PipelineConfig;
use crate::discovery::{GoogleSearch, SearchEngine, WebDiscovery};
use crate::dispatch::Dispatcher;
use crate::error::{BloodworkError, ExtractionError};
use crate::extract::{DocumentTextExtractor, TextExtractor};
use crate::fetch::{HttpPageFetcher, PageFetcher};
use crate::identify::IssueIdentifier;
use crate::providers::create_provider;
use crate::synthesize::RecommendationSynthesizer;
use crate::types::{Address, DispatchResult, RawDocument, RecommendationReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The external collaborators a pipeline talks to.
pub struct Services {
    pub extractor: Arc<dyn TextExtractor>,
    pub provider: Arc<dyn LlmProvider>,
    pub search: Arc<dyn SearchEngine>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub dispatcher: Dispatcher,
}

impl Services {
    /// Production services built from configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, BloodworkError> {
        Ok(Self {
            extractor: Arc::new(DocumentTextExtractor::new()),
            provider: create_provider(&config.llm)?,
            search: Arc::new(GoogleSearch::new(&config.search)?),
            fetcher: Arc::new(HttpPageFetcher::new(&config.fetch)?),
            dispatcher: Dispatcher::from_config(&config.email),
        })
    }
}

/// Result of one run: the report, what happened to its delivery, and run metadata.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub report: RecommendationReport,
    pub dispatch: DispatchResult,
}

impl PipelineOutcome {
    /// The text returned to the requester; identical to what was mailed.
    pub fn text(&self) -> String {
        self.report.render()
    }
}

/// One configured pipeline. Holds configuration and client handles only.
pub struct Pipeline {
    extractor: Arc<dyn TextExtractor>,
    identifier: IssueIdentifier,
    discovery: WebDiscovery,
    synthesizer: RecommendationSynthesizer,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, BloodworkError> {
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(Self::with_services(config, Services::from_config(config)?))
    }

    pub fn with_services(config: &PipelineConfig, services: Services) -> Self {
        let identifier = IssueIdentifier::new(services.provider.clone())
            .with_temperature(config.llm.temperature);
        let discovery = WebDiscovery::new(
            services.search,
            services.fetcher.clone(),
            config.search.clone(),
        );
        let synthesizer = RecommendationSynthesizer::new(
            services.provider,
            services.fetcher,
            config.report.clone(),
            config.fetch.max_content_chars,
        )
        .with_temperature(config.llm.temperature);
        Self {
            extractor: services.extractor,
            identifier,
            discovery,
            synthesizer,
            dispatcher: services.dispatcher,
        }
    }

    /// Run every stage for one document.
    ///
    /// Fails only when the document cannot be turned into text. With no
    /// destination the report is still produced and delivery is skipped.
    pub async fn run(
        &self,
        document: RawDocument,
        destination: Option<&Address>,
    ) -> Result<PipelineOutcome, ExtractionError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, bytes = document.len(), "Pipeline started");

        let text = self.extractor.extract(document).await.map_err(|e| {
            warn!(run_id = %run_id, error = %e, "Text extraction failed");
            e
        })?;
        info!(run_id = %run_id, chars = text.as_str().len(), "Extracted text");

        let issues = self.identifier.identify(&text).await;
        info!(run_id = %run_id, issues = issues.len(), "Identified issues");

        let links = self.discovery.discover(&issues).await;
        let report = self.synthesizer.synthesize(&issues, &links).await;
        info!(
            run_id = %run_id,
            kind = ?report.kind,
            recommendations = report.recommendations.len(),
            urls = report.urls.len(),
            "Report assembled"
        );

        let dispatch = match destination {
            Some(address) => self.dispatcher.dispatch(&report, address).await,
            None => DispatchResult::Skipped {
                reason: "no destination address".to_string(),
            },
        };

        let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
        info!(
            run_id = %run_id,
            elapsed_ms,
            delivered = dispatch.is_delivered(),
            "Pipeline finished"
        );

        Ok(PipelineOutcome {
            run_id,
            started_at,
            report,
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::{DiscoveryError, FetchError};
    use crate::fetch::FetchedPage;
    use crate::types::ReportKind;
    use async_trait::async_trait;

    struct NoResults;

    #[async_trait]
    impl SearchEngine for NoResults {
        async fn search(&self, _query: &str) -> Result<String, DiscoveryError> {
            Ok("<html></html>".into())
        }
    }

    struct NothingServed;

    #[async_trait]
    impl PageFetcher for NothingServed {
        async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
            Err(FetchError::Request {
                url: url.into(),
                message: "offline".into(),
            })
        }
    }

    fn pipeline(mock: Arc<MockLlmProvider>) -> Pipeline {
        Pipeline::with_services(
            &PipelineConfig::default(),
            Services {
                extractor: Arc::new(DocumentTextExtractor::new()),
                provider: mock,
                search: Arc::new(NoResults),
                fetcher: Arc::new(NothingServed),
                dispatcher: Dispatcher::disabled("test"),
            },
        )
    }

    #[tokio::test]
    async fn test_extraction_failure_is_fatal() {
        let mock = Arc::new(MockLlmProvider::with_response("Health Issue: Anemia"));
        let result = pipeline(mock.clone())
            .run(RawDocument::new(Vec::new()), None)
            .await;
        assert!(matches!(result, Err(ExtractionError::EmptyDocument)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_links_yields_fallback_text() {
        let mock = Arc::new(MockLlmProvider::with_response("Health Issue: Anemia"));
        let outcome = pipeline(mock.clone())
            .run(RawDocument::new(b"Hemoglobin 9.1 g/dL".to_vec()), None)
            .await
            .unwrap();
        assert_eq!(outcome.report.kind, ReportKind::NoRelevantArticles);
        assert_eq!(outcome.text(), RecommendationReport::NO_RELEVANT_ARTICLES);
        assert!(matches!(outcome.dispatch, DispatchResult::Skipped { .. }));
        // Only the identification call; synthesis short-circuits.
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_skips_even_with_destination() {
        let mock = Arc::new(MockLlmProvider::failing());
        let address = Address::parse("owner@example.com").unwrap();
        let outcome = pipeline(mock)
            .run(RawDocument::new(b"LDL 190".to_vec()), Some(&address))
            .await
            .unwrap();
        assert_eq!(
            outcome.dispatch,
            DispatchResult::Skipped {
                reason: "test".into()
            }
        );
    }
}
