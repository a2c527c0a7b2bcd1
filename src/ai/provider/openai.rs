//! OpenAI API Provider
//!
//! Chat provider using OpenAI's Chat Completions API. HTTP failures are
//! classified into error categories; recoverable ones are retried with
//! bounded backoff before the error reaches the caller.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    supports_temperature, ChatProvider, ChatRequest, LlmResponse, ResponseMetadata,
    ResponseTiming, TokenUsage,
};
use crate::ai::retry::with_retry;
use crate::config::LlmConfig;
use crate::types::{ErrorClassifier, LoomError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER_NAME: &str = "openai";

/// OpenAI chat provider with secure API key handling
pub struct OpenAiProvider {
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                LoomError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY env var or provide in config"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(
                crate::constants::network::CONNECTION_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| LoomError::LlmApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn build_request(&self, request: &ChatRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let temperature = if supports_temperature(&self.model) {
            Some(request.temperature.unwrap_or(self.temperature))
        } else {
            None
        };

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            response_format: request.json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<LlmResponse> {
        debug!(model = %self.model, json_mode = request.json_mode, "Sending chat completion");

        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                LoomError::Provider(ErrorClassifier::classify(
                    &format!("OpenAI request failed: {e}"),
                    PROVIDER_NAME,
                ))
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(status, "OpenAI API error");
            return Err(LoomError::Provider(ErrorClassifier::classify_http_status(
                status,
                &text,
                PROVIDER_NAME,
            )));
        }

        let response_body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse OpenAI response: {e}")))?;

        let usage = response_body
            .usage
            .map(|u| TokenUsage::from_openai(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content = response_body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LoomError::LlmApi("No content in OpenAI response".to_string()))?;

        Ok(LlmResponse {
            content,
            usage,
            timing: ResponseTiming::from_duration(elapsed),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                provider: PROVIDER_NAME.to_string(),
            },
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<LlmResponse> {
        with_retry("chat_completion", || self.complete_once(request)).await
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_fixed_temperature_model_omits_parameter() {
        let mut config = config_with_key();
        config.model = "o1-mini".to_string();
        let provider = OpenAiProvider::new(&config).unwrap();
        let body = provider.build_request(&ChatRequest::json("x").with_temperature(0.3));
        assert!(body.temperature.is_none());
    }

    #[test]
    fn test_request_temperature_overrides_default() {
        let provider = OpenAiProvider::new(&config_with_key()).unwrap();
        let body = provider.build_request(&ChatRequest::json("x").with_temperature(0.3));
        assert_eq!(body.temperature, Some(0.3));

        let body = provider.build_request(&ChatRequest::text("x"));
        assert_eq!(body.temperature, Some(0.7));
    }

    #[test]
    fn test_json_mode_sets_response_format() {
        let provider = OpenAiProvider::new(&config_with_key()).unwrap();
        let body = provider.build_request(&ChatRequest::json("x"));
        assert!(body.response_format.is_some());

        let body = provider.build_request(&ChatRequest::text("x"));
        assert!(body.response_format.is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = OpenAiProvider::new(&config_with_key()).unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-test"));
    }
}
