//! Configuration Types
//!
//! Runtime configuration for providers, pricing, and storage. API keys are
//! never serialized back out and are redacted in debug output; each provider
//! converts its key to `SecretString` internally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants;
use crate::types::{LoomError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            research: ResearchConfig::default(),
            qa: QaConfig::default(),
            pricing: PricingConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Validate cross-field consistency after loading
    pub fn validate(&self) -> Result<()> {
        if self.llm.timeout_secs == 0 {
            return Err(LoomError::Config(
                "llm.timeout_secs must be positive".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(LoomError::Config(
                "embedding.dimensions must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(LoomError::Config(format!(
                "llm.temperature {} out of range 0.0..=2.0",
                self.llm.temperature
            )));
        }
        for (field, base) in [
            ("llm.api_base", &self.llm.api_base),
            ("embedding.api_base", &self.embedding.api_base),
            ("research.api_base", &self.research.api_base),
            ("qa.api_base", &self.qa.api_base),
        ] {
            if let Some(base) = base {
                url::Url::parse(base).map_err(|e| {
                    LoomError::Config(format!("{field} '{base}' is not a valid URL: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// LLM
// =============================================================================

/// Chat-completion provider settings
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Never serialized back out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout() -> u64 {
    constants::network::DEFAULT_TIMEOUT_SECS
}

fn default_temperature() -> f32 {
    constants::blueprint::INITIAL_TEMPERATURE
}

fn default_max_tokens() -> usize {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_key: None,
            api_base: None,
            timeout_secs: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

// =============================================================================
// Embedding
// =============================================================================

/// Embedding provider settings
#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Inputs longer than this many characters are truncated before embedding
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    constants::embedding::DIMENSIONS
}

fn default_max_input_chars() -> usize {
    constants::embedding::MAX_INPUT_CHARS
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_key: None,
            api_base: None,
            dimensions: default_dimensions(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("dimensions", &self.dimensions)
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

// =============================================================================
// Research Providers
// =============================================================================

/// Deep-research / web-search provider settings.
///
/// When `api_key` is absent, deep-research routing degrades to the LLM stub
/// strategy and synchronous search is unavailable.
#[derive(Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_research_model")]
    pub deep_research_model: String,
}

fn default_research_model() -> String {
    "exa-research".to_string()
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            deep_research_model: default_research_model(),
        }
    }
}

impl ResearchConfig {
    /// Deep research requires a provider key
    pub fn deep_research_available(&self) -> bool {
        self.api_key.is_some()
    }
}

impl std::fmt::Debug for ResearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("deep_research_model", &self.deep_research_model)
            .finish()
    }
}

/// Authoritative Q&A provider settings
#[derive(Clone, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_qa_model")]
    pub model: String,
}

fn default_qa_model() -> String {
    "sonar".to_string()
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: default_qa_model(),
        }
    }
}

impl QaConfig {
    pub fn available(&self) -> bool {
        self.api_key.is_some()
    }
}

impl std::fmt::Debug for QaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish()
    }
}

// =============================================================================
// Pricing
// =============================================================================

/// Per-model token rates, USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Pricing table injected into the cost calculator.
/// Treated as opaque configuration; rates here are conservative defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Known model rates keyed by model-name prefix
    #[serde(default = "default_model_rates")]
    pub models: HashMap<String, ModelRate>,
    /// Fallback rate for unknown models
    #[serde(default = "default_fallback_rate")]
    pub fallback: ModelRate,
    /// Flat USD per synchronous search query
    #[serde(default = "default_search_cost")]
    pub search_per_query: f64,
    /// Flat USD per deep-research task
    #[serde(default = "default_deep_research_cost")]
    pub deep_research_per_task: f64,
    /// Flat USD per authoritative Q&A call
    #[serde(default = "default_qa_cost")]
    pub qa_per_call: f64,
    /// USD per million embedding tokens
    #[serde(default = "default_embedding_rate")]
    pub embedding_per_million: f64,
}

fn default_model_rates() -> HashMap<String, ModelRate> {
    HashMap::from([
        (
            "gpt-4o-mini".to_string(),
            ModelRate {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
        ),
        (
            "gpt-4o".to_string(),
            ModelRate {
                input_per_million: 2.50,
                output_per_million: 10.00,
            },
        ),
        (
            "o1".to_string(),
            ModelRate {
                input_per_million: 15.00,
                output_per_million: 60.00,
            },
        ),
    ])
}

fn default_fallback_rate() -> ModelRate {
    ModelRate {
        input_per_million: 1.00,
        output_per_million: 3.00,
    }
}

fn default_search_cost() -> f64 {
    0.005
}

fn default_deep_research_cost() -> f64 {
    0.05
}

fn default_qa_cost() -> f64 {
    0.005
}

fn default_embedding_rate() -> f64 {
    0.02
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: default_model_rates(),
            fallback: default_fallback_rate(),
            search_per_query: default_search_cost(),
            deep_research_per_task: default_deep_research_cost(),
            qa_per_call: default_qa_cost(),
            embedding_per_million: default_embedding_rate(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// SQLite storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "contextloom.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
