//! Recommendation synthesis.
//!
//! For each issue: pick up to `links_per_issue` (at most 2) links whose URL
//! mentions a word of the issue label, scrape their paragraphs, and ask the
//! generation service for single-line recommendations. Everything accumulates
//! across issues and is bounded once, in [`RecommendationReport::assemble`].

use crate::brain::{CompletionRequest, LlmProvider};
use crate::config::ReportConfig;
use crate::fetch::PageFetcher;
use crate::types::{CandidateLink, HealthIssue, MAX_LINKS_PER_ISSUE, RecommendationReport};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RecommendationSynthesizer {
    provider: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn PageFetcher>,
    report: ReportConfig,
    max_content_chars: usize,
    temperature: f32,
}

impl RecommendationSynthesizer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn PageFetcher>,
        report: ReportConfig,
        max_content_chars: usize,
    ) -> Self {
        Self {
            provider,
            fetcher,
            report,
            max_content_chars,
            temperature: 0.4,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_prompt(content: &str) -> String {
        format!(
            "Based on the following content, generate 6 single line health recommendations:\n{}",
            content
        )
    }

    /// Build the report for `issues` from the discovered `links`.
    ///
    /// With no links at all, returns the "no relevant articles" report without
    /// calling the generation service.
    pub async fn synthesize(
        &self,
        issues: &[HealthIssue],
        links: &[CandidateLink],
    ) -> RecommendationReport {
        if links.is_empty() {
            info!("No links discovered; skipping synthesis");
            return RecommendationReport::no_relevant_articles();
        }

        let mut recommendations = Vec::new();
        let mut urls = Vec::new();

        for issue in issues {
            let selected = select_links(issue, links, self.links_per_issue());
            debug!(issue = %issue, selected = selected.len(), "Selected links");

            let content = self.aggregate_content(&selected).await;
            if content.is_empty() {
                debug!(issue = %issue, "No article content; skipping generation");
            } else {
                recommendations.extend(self.generate(issue, &content).await);
            }

            urls.extend(selected.iter().map(|link| link.url.clone()));
        }

        RecommendationReport::assemble(
            issues.to_vec(),
            recommendations,
            urls,
            self.report.max_recommendations,
            self.report.max_urls,
        )
    }

    fn links_per_issue(&self) -> usize {
        self.report.links_per_issue.min(MAX_LINKS_PER_ISSUE)
    }

    /// Concatenate the paragraph text of each link; failed or empty pages add nothing.
    async fn aggregate_content(&self, links: &[&CandidateLink]) -> String {
        let mut parts: Vec<String> = Vec::new();
        for link in links {
            match self.fetcher.article_text(&link.url).await {
                Ok(article) if !article.is_blank() => parts.push(article.text),
                Ok(_) => debug!(url = %link.url, "Article has no paragraph text"),
                Err(e) => warn!(url = %link.url, error = %e, "Failed to fetch article"),
            }
        }
        truncate_chars(&parts.join(" "), self.max_content_chars)
    }

    async fn generate(&self, issue: &HealthIssue, content: &str) -> Vec<String> {
        let request = CompletionRequest::prompt(Self::build_prompt(content))
            .with_temperature(self.temperature);
        match self.provider.complete(request).await {
            Ok(response) => {
                let lines = parse_recommendations(&response.text);
                debug!(issue = %issue, count = lines.len(), "Generated recommendations");
                lines
            }
            Err(e) => {
                warn!(issue = %issue, error = %e, "Recommendation generation failed");
                Vec::new()
            }
        }
    }
}

/// The first `limit` links whose URL contains a token of the issue label, in encounter order.
pub fn select_links<'a>(
    issue: &HealthIssue,
    links: &'a [CandidateLink],
    limit: usize,
) -> Vec<&'a CandidateLink> {
    links
        .iter()
        .filter(|link| issue.matches_url(&link.url))
        .take(limit)
        .collect()
}

/// One recommendation per non-blank line, with a leading list bullet removed.
pub fn parse_recommendations(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .map(|line| {
            line.strip_prefix('-')
                .or_else(|| line.strip_prefix('•'))
                .map(str::trim_start)
                .unwrap_or(line)
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
