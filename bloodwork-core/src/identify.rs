//! Issue identification.
//!
//! Sends the extracted report text to the generation service with a fixed
//! instruction and scans the reply for `Health Issue:` lines. Failures are
//! logged and yield an empty list; the caller treats that as "no issues found".

use crate::brain::{CompletionRequest, LlmProvider};
use crate::types::{ExtractedText, HealthIssue};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Line marker the generation service is asked to prefix each issue with.
pub const ISSUE_MARKER: &str = "Health Issue:";

/// Asks the generation service for the main health issues in a report.
pub struct IssueIdentifier {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
}

impl IssueIdentifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The instruction sent alongside the report text.
    pub fn build_prompt(text: &ExtractedText) -> String {
        format!(
            "Please analyze the following blood test report and identify the 2 main health issue names only. \
             List each one on its own line in exactly this form: \
             {marker} [Health Condition based on the report provided]\n\
             Report: {text}",
            marker = ISSUE_MARKER,
            text = text.as_str()
        )
    }

    /// Identify the issues named in `text`, in generation order.
    ///
    /// Never fails: a blank text or a failed generation call yields `[]`.
    pub async fn identify(&self, text: &ExtractedText) -> Vec<HealthIssue> {
        if text.is_blank() {
            info!("Extracted text is blank; skipping issue identification");
            return Vec::new();
        }

        let request = CompletionRequest::prompt(Self::build_prompt(text))
            .with_temperature(self.temperature);

        match self.provider.complete(request).await {
            Ok(response) => {
                let issues = parse_issues(&response.text);
                if issues.is_empty() {
                    warn!(
                        model = %response.model,
                        "Generation reply contained no '{}' lines", ISSUE_MARKER
                    );
                } else {
                    debug!(count = issues.len(), "Identified health issues");
                }
                issues
            }
            Err(e) => {
                warn!(error = %e, "Issue identification failed");
                Vec::new()
            }
        }
    }
}

/// Extract every issue label from a generation reply, preserving order and duplicates.
///
/// A line counts when it contains [`ISSUE_MARKER`]; the label is whatever follows
/// the first occurrence, stripped of emphasis markup and template brackets.
/// Lines whose label ends up empty are skipped.
pub fn parse_issues(reply: &str) -> Vec<HealthIssue> {
    reply
        .lines()
        .filter_map(|line| line.split_once(ISSUE_MARKER).map(|(_, rest)| rest))
        .map(clean_label)
        .filter(|label| !label.is_empty())
        .map(HealthIssue::new)
        .collect()
}

fn clean_label(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '#'));
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    unbracketed.trim().to_string()
}
