//! Web discovery: search per issue, extract wrapped result links, probe them.

use crate::config::SearchConfig;
use crate::error::DiscoveryError;
use crate::fetch::{PageFetcher, validate_url};
use crate::types::{CandidateLink, HealthIssue};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker preceding the destination in a search engine's redirect links.
pub const REDIRECT_MARKER: &str = "url?q=";

/// A search service returning an HTML result page for a free-text query.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, DiscoveryError>;
}

/// Google web search over plain HTTP, no API key.
pub struct GoogleSearch {
    client: Client,
    base_url: String,
}

impl GoogleSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DiscoveryError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn query_url(&self, query: &str) -> String {
        format!("{}?q={}", self.base_url, urlencoding::encode(query))
    }
}

#[async_trait]
impl SearchEngine for GoogleSearch {
    async fn search(&self, query: &str) -> Result<String, DiscoveryError> {
        let url = self.query_url(query);
        debug!(url = %url, "Searching");

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| DiscoveryError::Request {
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| DiscoveryError::Request {
            message: format!("Failed to read search page: {}", e),
        })
    }
}

/// Destination URLs wrapped in `url?q=` redirect links, in page order, without repeats.
pub fn extract_candidate_urls(html: &str) -> Vec<String> {
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut urls: Vec<String> = Vec::new();
    for anchor in document.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(destination) = unwrap_redirect(href) else {
            continue;
        };
        if !urls.contains(&destination) {
            urls.push(destination);
        }
    }
    urls
}

/// The percent-decoded destination of a redirect href, if it is an absolute http(s) URL.
fn unwrap_redirect(href: &str) -> Option<String> {
    let (_, wrapped) = href.split_once(REDIRECT_MARKER)?;
    let encoded = wrapped.split('&').next().unwrap_or_default();
    let decoded = urlencoding::decode(encoded).ok()?.into_owned();
    validate_url(&decoded).ok()?;
    Some(decoded)
}

/// Finds reachable links for each issue.
pub struct WebDiscovery {
    engine: Arc<dyn SearchEngine>,
    fetcher: Arc<dyn PageFetcher>,
    config: SearchConfig,
}

impl WebDiscovery {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        fetcher: Arc<dyn PageFetcher>,
        config: SearchConfig,
    ) -> Self {
        Self {
            engine,
            fetcher,
            config,
        }
    }

    /// Search for every issue in order and keep the candidates that pass a probe.
    ///
    /// A failed search costs only that issue its links.
    pub async fn discover(&self, issues: &[HealthIssue]) -> Vec<CandidateLink> {
        let mut links = Vec::new();
        for issue in issues {
            links.extend(self.discover_issue(issue).await);
        }
        info!(
            issues = issues.len(),
            links = links.len(),
            "Discovery finished"
        );
        links
    }

    async fn discover_issue(&self, issue: &HealthIssue) -> Vec<CandidateLink> {
        let query = self.config.query_for(issue.label());
        let html = match self.engine.search(&query).await {
            Ok(html) => html,
            Err(e) => {
                warn!(issue = %issue, error = %e, "Search failed; issue contributes no links");
                return Vec::new();
            }
        };

        let candidates = extract_candidate_urls(&html);
        debug!(issue = %issue, candidates = candidates.len(), "Extracted candidate links");

        let mut reachable = Vec::new();
        for url in candidates
            .into_iter()
            .take(self.config.max_candidates_per_issue)
        {
            if self.fetcher.probe(&url).await {
                reachable.push(CandidateLink::new(url, issue.clone()).reachable());
            } else {
                debug!(issue = %issue, url = %url, "Dropping unreachable link");
            }
        }
        reachable
    }
}
