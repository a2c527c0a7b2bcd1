//! Encyclopedia Lookup
//!
//! Wikipedia REST client with a minimum interval between calls and bounded
//! backoff on failure. Lookup is two-step: title search, then extract fetch
//! for the top match.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::encyclopedia;
use crate::types::{ErrorCategory, ErrorClassifier, LoomError, Result};

const DEFAULT_API_BASE: &str = "https://en.wikipedia.org/w/api.php";
const USER_AGENT: &str = concat!("contextloom/", env!("CARGO_PKG_VERSION"));
const PROVIDER_NAME: &str = "wikipedia";

/// One fetched encyclopedia article
#[derive(Debug, Clone)]
pub struct EncyclopediaArticle {
    pub title: String,
    pub extract: String,
    pub url: String,
}

pub type SharedEncyclopedia = Arc<dyn Encyclopedia + Send + Sync>;

/// Encyclopedia article lookup
#[async_trait]
pub trait Encyclopedia: Send + Sync {
    /// Find the best-matching article for a query, if any
    async fn lookup(&self, query: &str) -> Result<Option<EncyclopediaArticle>>;
}

/// Wikipedia client with courtesy rate limiting
pub struct WikipediaClient {
    api_base: String,
    client: reqwest::Client,
    /// Completion time of the most recent call, for interval enforcement
    last_call: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl WikipediaClient {
    pub fn new() -> Result<Self> {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(
                crate::constants::network::DEFAULT_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| LoomError::LlmApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_base: api_base.into(),
            client,
            last_call: Mutex::new(None),
            min_interval: Duration::from_millis(encyclopedia::MIN_CALL_INTERVAL_MS),
        })
    }

    /// Sleep until the minimum interval since the previous call has elapsed
    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.throttle().await;
        let response = self
            .client
            .get(&self.api_base)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                LoomError::Provider(ErrorClassifier::classify(
                    &format!("Encyclopedia request failed: {e}"),
                    PROVIDER_NAME,
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LoomError::Provider(ErrorClassifier::classify_http_status(
                status,
                &text,
                PROVIDER_NAME,
            )));
        }
        Ok(response)
    }

    async fn search_title(&self, query: &str) -> Result<Option<String>> {
        let response = self
            .get(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "1"),
                ("format", "json"),
            ])
            .await?;

        let parsed: SearchEnvelope = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse search response: {e}")))?;

        Ok(parsed
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|hit| hit.title))
    }

    async fn fetch_extract(&self, title: &str) -> Result<Option<EncyclopediaArticle>> {
        let response = self
            .get(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("titles", title),
                ("explaintext", "1"),
                ("exsectionformat", "plain"),
                ("format", "json"),
            ])
            .await?;

        let parsed: ExtractEnvelope = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse extract response: {e}")))?;

        let page = parsed
            .query
            .and_then(|q| q.pages.into_values().next())
            .filter(|p| !p.extract.is_empty());

        Ok(page.map(|p| EncyclopediaArticle {
            url: format!(
                "https://en.wikipedia.org/wiki/{}",
                p.title.replace(' ', "_")
            ),
            title: p.title,
            extract: p.extract,
        }))
    }

    async fn lookup_once(&self, query: &str) -> Result<Option<EncyclopediaArticle>> {
        let Some(title) = self.search_title(query).await? else {
            return Ok(None);
        };
        self.fetch_extract(&title).await
    }
}

/// Only throttling and transient server responses are worth the wait;
/// everything else fails the lookup immediately
fn retryable_lookup_error(err: &LoomError) -> bool {
    matches!(
        err,
        LoomError::Provider(p)
            if matches!(p.category, ErrorCategory::RateLimit | ErrorCategory::Transient)
    )
}

#[async_trait]
impl Encyclopedia for WikipediaClient {
    async fn lookup(&self, query: &str) -> Result<Option<EncyclopediaArticle>> {
        let mut delay = Duration::from_millis(encyclopedia::BACKOFF_BASE_MS);

        for attempt in 1..=encyclopedia::MAX_ATTEMPTS {
            match self.lookup_once(query).await {
                Ok(article) => {
                    debug!(%query, found = article.is_some(), "Encyclopedia lookup done");
                    return Ok(article);
                }
                Err(e) if retryable_lookup_error(&e) && attempt < encyclopedia::MAX_ATTEMPTS => {
                    warn!(%query, attempt, error = %e, "Encyclopedia throttled, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LoomError::LlmApi(
            "encyclopedia lookup failed with no attempts".to_string(),
        ))
    }
}

// Response envelopes

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchTitleHit>,
}

#[derive(Debug, Deserialize)]
struct SearchTitleHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractEnvelope {
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    title: String,
    #[serde(default)]
    extract: String,
}
