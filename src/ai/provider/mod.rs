//! LLM Provider Abstraction
//!
//! Defines the `ChatProvider` trait for text and structured-JSON generation.
//! All providers return `LlmResponse` with token usage metrics for cost
//! tracking.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Result;

// =============================================================================
// Requests
// =============================================================================

/// One chat-completion request.
///
/// `temperature: None` means "use the provider's configured default". Some
/// model families only accept their fixed default temperature; providers
/// omit the parameter entirely for those (see [`supports_temperature`]).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    /// Request strict JSON output from the provider
    pub json_mode: bool,
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: None,
            json_mode: false,
            max_tokens: None,
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            json_mode: true,
            ..Self::text(prompt)
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Whether a model accepts an explicit temperature parameter.
///
/// Reasoning-model families reject non-default temperatures outright, so
/// requests to them must omit the field rather than send the default.
pub fn supports_temperature(model: &str) -> bool {
    const FIXED_TEMPERATURE_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];
    !FIXED_TEMPERATURE_PREFIXES
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

// =============================================================================
// LLM Response with Usage Metrics
// =============================================================================

/// Complete LLM response including content and usage metrics
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Raw generated text (JSON when `json_mode` was requested)
    pub content: String,
    pub usage: TokenUsage,
    pub timing: ResponseTiming,
    pub metadata: ResponseMetadata,
}

impl LlmResponse {
    /// Create response with content only (usage unknown)
    pub fn content_only(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            timing: ResponseTiming::default(),
            metadata: ResponseMetadata::default(),
        }
    }
}

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn from_openai(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
        }
    }
}

/// Response timing metrics
#[derive(Debug, Clone, Default)]
pub struct ResponseTiming {
    /// Wall-clock time in milliseconds
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

/// Provider and model info attached to each response
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: String,
}

/// Shared chat provider for concurrent access across pipeline stages.
pub type SharedProvider = Arc<dyn ChatProvider + Send + Sync>;

// =============================================================================
// Chat Provider Trait
// =============================================================================

/// Chat-completion provider
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one chat completion
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_temperature_models_detected() {
        assert!(!supports_temperature("o1-mini"));
        assert!(!supports_temperature("o3"));
        assert!(!supports_temperature("gpt-5-nano"));
        assert!(supports_temperature("gpt-4o-mini"));
        assert!(supports_temperature("gpt-4o"));
    }

    #[test]
    fn test_request_builders() {
        let req = ChatRequest::json("plan it").with_temperature(0.3);
        assert!(req.json_mode);
        assert_eq!(req.temperature, Some(0.3));
        assert!(req.system.is_none());
    }
}
