//! Page fetching: reachability probes and article scraping.
//!
//! `PageFetcher` has a single required method, [`PageFetcher::get`]; probing and
//! paragraph extraction are provided on top of it so test doubles only need to
//! serve canned pages. [`HttpPageFetcher`] keeps a short-timeout client for
//! probes and a longer one for content.

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::extract::normalize_whitespace;
use crate::types::ArticleContent;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

/// Status and body of one HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`. Non-2xx responses are returned, not raised.
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// Whether `url` answers 2xx with a non-blank body. Never fails.
    async fn probe(&self, url: &str) -> bool {
        match self.get(url).await {
            Ok(page) => page_is_usable(&page),
            Err(e) => {
                debug!(url = %url, error = %e, "Probe failed");
                false
            }
        }
    }

    /// Fetch `url` and return the text of its `<p>` elements.
    async fn article_text(&self, url: &str) -> Result<ArticleContent, FetchError> {
        let page = self.get(url).await?;
        if !page.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: page.status,
            });
        }
        Ok(ArticleContent {
            url: url.to_string(),
            text: paragraph_text(&page.body),
        })
    }
}

fn page_is_usable(page: &FetchedPage) -> bool {
    page.is_success() && !page.body.trim().is_empty()
}

/// Text of every `<p>` element, joined by single spaces, whitespace compacted.
pub fn paragraph_text(html: &str) -> String {
    let Ok(selector) = Selector::parse("p") else {
        return String::new();
    };
    let document = Html::parse_document(html);
    let joined = document
        .select(&selector)
        .map(|p| p.text().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ");
    normalize_whitespace(&joined)
}

/// Reject anything that is not an absolute http(s) URL.
pub fn validate_url(raw: &str) -> Result<url::Url, FetchError> {
    let invalid = || FetchError::InvalidUrl {
        url: raw.to_string(),
    };
    let parsed = url::Url::parse(raw).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}

/// `PageFetcher` over reqwest.
pub struct HttpPageFetcher {
    probe_client: Client,
    content_client: Client,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Ok(Self {
            probe_client: build_client(config, config.probe_timeout_secs)?,
            content_client: build_client(config, config.content_timeout_secs)?,
        })
    }

    async fn fetch_with(client: &Client, url: &str) -> Result<FetchedPage, FetchError> {
        let target = validate_url(url)?;
        let response = client
            .get(target)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: format!("Failed to read response body: {}", e),
        })?;

        Ok(FetchedPage { status, body })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        Self::fetch_with(&self.content_client, url).await
    }

    async fn probe(&self, url: &str) -> bool {
        match Self::fetch_with(&self.probe_client, url).await {
            Ok(page) => {
                let usable = page_is_usable(&page);
                debug!(url = %url, status = page.status, usable, "Probed link");
                usable
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Probe failed");
                false
            }
        }
    }
}

fn build_client(config: &FetchConfig, timeout_secs: u64) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()
        .map_err(|e| FetchError::Client {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct CannedFetcher {
        pages: HashMap<String, FetchedPage>,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Request {
                    url: url.to_string(),
                    message: "connection refused".into(),
                })
        }
    }

    fn canned() -> CannedFetcher {
        let mut pages = HashMap::new();
        pages.insert(
            "https://ok.example/anemia".to_string(),
            FetchedPage::new(200, "<html><p>Iron helps.</p><p>Eat  greens.</p></html>"),
        );
        pages.insert(
            "https://blank.example/".to_string(),
            FetchedPage::new(200, "   \n"),
        );
        pages.insert(
            "https://gone.example/".to_string(),
            FetchedPage::new(404, "<p>Not found</p>"),
        );
        CannedFetcher { pages }
    }

    #[test]
    fn test_paragraph_text() {
        let html = r#"<html><head><title>t</title><script>var x;</script></head>
            <body><h1>Heading</h1><p>First   paragraph
            with <b>bold</b> text.</p><div>skip me</div><p>Second.</p></body></html>"#;
        assert_eq!(
            paragraph_text(html),
            "First paragraph with bold text. Second."
        );
    }

    #[test]
    fn test_paragraph_text_no_paragraphs() {
        assert_eq!(paragraph_text("<div>only divs</div>"), "");
        assert_eq!(paragraph_text(""), "");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.mayoclinic.org/anemia").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/file"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(validate_url("/url?q=relative").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn test_fetched_page_success_range() {
        assert!(FetchedPage::new(200, "").is_success());
        assert!(FetchedPage::new(204, "").is_success());
        assert!(!FetchedPage::new(301, "").is_success());
        assert!(!FetchedPage::new(500, "").is_success());
    }

    #[tokio::test]
    async fn test_default_probe() {
        let fetcher = canned();
        assert!(fetcher.probe("https://ok.example/anemia").await);
        assert!(!fetcher.probe("https://blank.example/").await);
        assert!(!fetcher.probe("https://gone.example/").await);
        assert!(!fetcher.probe("https://unknown.example/").await);
    }

    #[tokio::test]
    async fn test_default_article_text() {
        let fetcher = canned();
        let article = fetcher
            .article_text("https://ok.example/anemia")
            .await
            .unwrap();
        assert_eq!(article.text, "Iron helps. Eat greens.");

        let err = fetcher
            .article_text("https://gone.example/")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_invalid_url_without_network() {
        let fetcher = HttpPageFetcher::new(&FetchConfig::default()).unwrap();
        assert!(!fetcher.probe("not a url").await);
        assert!(matches!(
            fetcher.get("mailto:someone@example.com").await,
            Err(FetchError::InvalidUrl { .. })
        ));
    }
}
