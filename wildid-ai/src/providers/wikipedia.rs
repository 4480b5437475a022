//! Wikipedia adapter
//!
//! Fetches the REST page summary for a title. A 404 is a normal miss (`None`),
//! not a failure.
//!
//! # API Reference
//! - Endpoint: https://en.wikipedia.org/api/rest_v1/page/summary/{title}

use super::{check_status, rate_limiter, DirectRateLimiter, ProviderError, WikipediaProvider};
use crate::types::WikiCard;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// Wikipedia REST summary endpoint (title appended)
const WIKIPEDIA_SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";

/// Wikipedia client
pub struct WikipediaClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: DirectRateLimiter,
}

impl WikipediaClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: WIKIPEDIA_SUMMARY_URL.to_string(),
            rate_limiter: rate_limiter(10),
        }
    }
}

#[async_trait]
impl WikipediaProvider for WikipediaClient {
    async fn fetch(&self, title: &str) -> Result<Option<WikiCard>, ProviderError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(None);
        }

        self.rate_limiter.until_ready().await;

        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Transport(format!("Invalid Wikipedia URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Transport("Wikipedia URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&title.replace(' ', "_"));

        let response = self.http_client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(title, "No Wikipedia page");
            return Ok(None);
        }
        let response = check_status(response).await?;
        let summary: PageSummary = response.json().await?;
        Ok(card_from_summary(title, summary))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PageSummary {
    #[serde(rename = "type")]
    page_type: Option<String>,
    title: Option<String>,
    extract: Option<String>,
    thumbnail: Option<Thumbnail>,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    source: String,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

/// Build a card; disambiguation pages and empty extracts are misses
pub(crate) fn card_from_summary(requested_title: &str, summary: PageSummary) -> Option<WikiCard> {
    if summary.page_type.as_deref() == Some("disambiguation") {
        return None;
    }
    let extract = summary.extract.filter(|e| !e.trim().is_empty())?;

    Some(WikiCard {
        title: summary.title.unwrap_or_else(|| requested_title.to_string()),
        extract,
        thumbnail_url: summary.thumbnail.map(|t| t.source),
        page_url: summary.content_urls.and_then(|c| c.desktop).map(|d| d.page),
    })
}
