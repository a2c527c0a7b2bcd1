//! Embedding Provider
//!
//! Vector embedding behind a trait so the chunk pipeline can run against a
//! deterministic test double. Inputs are truncated to the provider's hard
//! character ceiling before the request is built.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ai::retry::with_retry;
use crate::config::EmbeddingConfig;
use crate::types::{ErrorClassifier, LoomError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER_NAME: &str = "openai-embeddings";

/// Shared embedding provider for concurrent batch embedding.
pub type SharedEmbedder = Arc<dyn EmbeddingProvider + Send + Sync>;

/// Vector embedding provider
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text into a fixed-length vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Expected vector length
    fn dimensions(&self) -> usize;
}

/// Truncate on a char boundary at or below the ceiling
pub fn truncate_input(text: &str, max_chars: usize) -> &str {
    if text.chars().count() <= max_chars {
        return text;
    }
    let byte_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..byte_end]
}

/// OpenAI embeddings API client
pub struct OpenAiEmbedder {
    api_key: SecretString,
    api_base: String,
    model: String,
    dimensions: usize,
    max_input_chars: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                LoomError::Config(
                    "Embedding API key not found. Set OPENAI_API_KEY env var or provide in config"
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
            dimensions: config.dimensions,
            max_input_chars: config.max_input_chars,
            client,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_input(text, self.max_input_chars);
        if input.len() < text.len() {
            debug!(
                original_chars = text.chars().count(),
                "Truncated embedding input"
            );
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

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
                    &format!("Embedding request failed: {e}"),
                    PROVIDER_NAME,
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(status, "Embedding API error");
            return Err(LoomError::Provider(ErrorClassifier::classify_http_status(
                status,
                &text,
                PROVIDER_NAME,
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LoomError::LlmApi("No embedding in response".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry("embedding", || self.embed_once(text)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: String,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
