//! Core type definitions for the bloodwork pipeline.
//!
//! Every value here lives for exactly one pipeline invocation: raw document
//! bytes, the text extracted from them, the issues named in that text, the
//! links discovered for those issues, and the bounded report that comes out the
//! other end.

use serde::{Deserialize, Serialize};

/// Hard upper bound on recommendation lines in a report.
pub const MAX_RECOMMENDATIONS: usize = 6;

/// Hard upper bound on related URLs in a report.
pub const MAX_URLS: usize = 4;

/// Hard upper bound on links read for a single issue.
pub const MAX_LINKS_PER_ISSUE: usize = 2;

/// Opaque document bytes as uploaded by the report owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Plain text derived from a [`RawDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedText(String);

impl ExtractedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the text has no non-whitespace content.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ExtractedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A short label naming a health condition, e.g. `"Iron Deficiency Anemia"`.
///
/// Issues keep generation order and are never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthIssue(String);

impl HealthIssue {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }

    /// Lowercased whitespace-separated tokens of the label, used for link matching.
    pub fn tokens(&self) -> Vec<String> {
        self.0.split_whitespace().map(str::to_lowercase).collect()
    }

    /// Whether `url` contains any token of this label, ignoring case.
    pub fn matches_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.tokens().iter().any(|token| url.contains(token.as_str()))
    }
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HealthIssue {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// A URL discovered by searching for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    pub url: String,
    /// The issue whose search query produced this link.
    pub issue: HealthIssue,
    /// Set by the reachability probe; links that fail are dropped.
    pub reachable: bool,
}

impl CandidateLink {
    pub fn new(url: impl Into<String>, issue: HealthIssue) -> Self {
        Self {
            url: url.into(),
            issue,
            reachable: false,
        }
    }

    pub fn reachable(mut self) -> Self {
        self.reachable = true;
        self
    }
}

/// Paragraph text scraped from a candidate link's page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArticleContent {
    pub url: String,
    pub text: String,
}

impl ArticleContent {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Which body a [`RecommendationReport`] renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Issues, recommendations and related URLs.
    Full,
    /// No reachable links were discovered, so nothing was synthesized.
    NoRelevantArticles,
    /// Links existed but no recommendation line was generated.
    NoRecommendations,
}

/// The bounded final artifact returned to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub kind: ReportKind,
    pub issues: Vec<HealthIssue>,
    pub recommendations: Vec<String>,
    pub urls: Vec<String>,
}

impl RecommendationReport {
    pub const NO_RELEVANT_ARTICLES: &'static str =
        "No relevant health articles could be found based on the report.";
    pub const NO_RECOMMENDATIONS: &'static str =
        "No specific recommendations could be generated based on the URLs.";

    /// The report returned when discovery produced no links.
    pub fn no_relevant_articles() -> Self {
        Self {
            kind: ReportKind::NoRelevantArticles,
            issues: Vec::new(),
            recommendations: Vec::new(),
            urls: Vec::new(),
        }
    }

    /// Assemble a report from everything accumulated across issues.
    ///
    /// Truncates to the hard bounds once, then strips emphasis markup and the
    /// generation service's boilerplate preamble from the kept lines.
    pub fn assemble(
        issues: Vec<HealthIssue>,
        mut recommendations: Vec<String>,
        mut urls: Vec<String>,
        max_recommendations: usize,
        max_urls: usize,
    ) -> Self {
        recommendations.truncate(max_recommendations.min(MAX_RECOMMENDATIONS));
        urls.truncate(max_urls.min(MAX_URLS));

        let recommendations: Vec<String> = recommendations
            .iter()
            .map(|line| strip_emphasis(line))
            .filter(|line| !line.is_empty() && !is_boilerplate_preamble(line))
            .collect();

        let kind = if recommendations.is_empty() {
            ReportKind::NoRecommendations
        } else {
            ReportKind::Full
        };

        Self {
            kind,
            issues,
            recommendations,
            urls,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.kind != ReportKind::Full
    }

    /// Render the report as the plain text shown to, and mailed to, the owner.
    pub fn render(&self) -> String {
        match self.kind {
            ReportKind::NoRelevantArticles => Self::NO_RELEVANT_ARTICLES.to_string(),
            ReportKind::NoRecommendations => Self::NO_RECOMMENDATIONS.to_string(),
            ReportKind::Full => {
                let issues: Vec<String> =
                    self.issues.iter().map(|i| strip_emphasis(i.label())).collect();
                let mut out = format!("Health Issues: {}\n", issues.join(", "));
                out.push_str("Recommendations:\n");
                for rec in &self.recommendations {
                    out.push_str("- ");
                    out.push_str(rec);
                    out.push('\n');
                }
                out.push_str("Related URLs:");
                for url in &self.urls {
                    out.push_str("\n- ");
                    out.push_str(url);
                }
                out
            }
        }
    }
}

impl std::fmt::Display for RecommendationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Remove `*` emphasis markers and surrounding whitespace.
pub(crate) fn strip_emphasis(text: &str) -> String {
    text.replace('*', "").trim().to_string()
}

/// Lines like "Here are 6 single-line health recommendations based on the provided content:".
pub(crate) fn is_boilerplate_preamble(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    lower.starts_with("here are") && lower.ends_with(':')
}

/// A mail destination for the finished report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse a mailbox address, rejecting anything without a local part and a domain.
    pub fn parse(raw: &str) -> Result<Self, crate::error::DeliveryError> {
        let trimmed = raw.trim();
        let valid = trimmed
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            })
            && !trimmed.contains(char::is_whitespace);
        if !valid {
            return Err(crate::error::DeliveryError::InvalidAddress {
                address: raw.to_string(),
                reason: "expected local@domain".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = crate::error::DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Outcome of handing a report to the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    Delivered { response: String },
    Failed { reason: String },
    Skipped { reason: String },
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchResult::Delivered { .. })
    }
}
