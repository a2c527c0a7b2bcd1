//! Authoritative Q&A Provider
//!
//! Perplexity-style question answering used to polish glossary definitions.
//! Credit exhaustion trips a one-way latch: once the account signature is
//! seen, the provider is disabled for the remainder of the run and callers
//! fall back to LLM-only definitions.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::QaConfig;
use crate::types::{ErrorCategory, ErrorClassifier, LoomError, Result};

const DEFAULT_API_BASE: &str = "https://api.perplexity.ai";
const PROVIDER_NAME: &str = "perplexity";

/// One Q&A answer with citations
#[derive(Debug, Clone)]
pub struct QaAnswer {
    pub content: String,
    pub citations: Vec<String>,
}

pub type SharedQaApi = Arc<dyn QaApi + Send + Sync>;

/// Question answering with provider-level disable state
#[async_trait]
pub trait QaApi: Send + Sync {
    async fn ask(&self, question: &str) -> Result<QaAnswer>;

    /// True once the provider has been disabled for this run
    fn is_disabled(&self) -> bool;
}

/// One-way disable latch.
///
/// Unlike a full circuit breaker there is no recovery path: exhausted
/// credits do not come back mid-run, so the latch only ever trips once.
#[derive(Debug, Default)]
pub struct CreditLatch {
    tripped: AtomicBool,
}

impl CreditLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, provider: &str) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            warn!(%provider, "Credits exhausted; provider disabled for the rest of the run");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// Perplexity API client with credit-exhaustion latch
pub struct PerplexityClient {
    api_key: SecretString,
    api_base: String,
    model: String,
    latch: CreditLatch,
    client: reqwest::Client,
}

impl std::fmt::Debug for PerplexityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerplexityClient")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("disabled", &self.latch.is_tripped())
            .finish()
    }
}

impl PerplexityClient {
    pub fn new(config: &QaConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("PERPLEXITY_API_KEY").ok())
            .ok_or_else(|| {
                LoomError::Config(
                    "Q&A API key not found. Set PERPLEXITY_API_KEY env var or provide in config"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                crate::constants::network::DEFAULT_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| LoomError::LlmApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base,
            model: config.model.clone(),
            latch: CreditLatch::new(),
            client,
        })
    }
}

#[async_trait]
impl QaApi for PerplexityClient {
    async fn ask(&self, question: &str) -> Result<QaAnswer> {
        if self.latch.is_tripped() {
            return Err(LoomError::CreditsExhausted(
                "Q&A provider disabled for this run".to_string(),
            ));
        }

        debug!("Sending Q&A request");
        let body = QaRequest {
            model: &self.model,
            messages: vec![QaMessage {
                role: "user",
                content: question,
            }],
        };

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                LoomError::Provider(ErrorClassifier::classify(
                    &format!("Q&A request failed: {e}"),
                    PROVIDER_NAME,
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let classified = ErrorClassifier::classify_http_status(status, &text, PROVIDER_NAME);
            if classified.category == ErrorCategory::CreditsExhausted {
                self.latch.trip(PROVIDER_NAME);
            }
            return Err(classified.into());
        }

        let parsed: QaResponse = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse Q&A response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LoomError::LlmApi("No content in Q&A response".to_string()))?;

        Ok(QaAnswer {
            content,
            citations: parsed.citations,
        })
    }

    fn is_disabled(&self) -> bool {
        self.latch.is_tripped()
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct QaRequest<'a> {
    model: &'a str,
    messages: Vec<QaMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct QaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct QaResponse {
    choices: Vec<QaChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QaChoice {
    message: QaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct QaResponseMessage {
    content: Option<String>,
}
