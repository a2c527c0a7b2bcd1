//! Web Search and Deep Research
//!
//! One provider covers both synchronous search and asynchronous deep-research
//! tasks. A task that the provider rejects at schema validation is fatal for
//! the whole run; the caller must not retry it.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ResearchConfig;
use crate::types::{ErrorClassifier, LoomError, Result};

const DEFAULT_API_BASE: &str = "https://api.exa.ai";
const PROVIDER_NAME: &str = "exa";

/// One synchronous search hit
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// State of an asynchronous deep-research task
#[derive(Debug, Clone)]
pub enum DeepTaskStatus {
    Running,
    /// Final report text produced by the task
    Completed(String),
    Failed(String),
}

pub type SharedSearchApi = Arc<dyn SearchApi + Send + Sync>;

/// Synchronous search plus asynchronous deep-research tasks
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Run a synchronous search returning up to `limit` hits
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Submit a deep-research task; returns the provider task id
    async fn start_research(&self, instructions: &str, schema: &Value) -> Result<String>;

    /// Poll a deep-research task.
    ///
    /// Returns `Err(LoomError::SchemaRejected)` when the provider rejected
    /// the task's output schema. That error is fatal and non-retryable.
    async fn poll_research(&self, task_id: &str) -> Result<DeepTaskStatus>;
}

/// Exa API client
pub struct ExaClient {
    api_key: SecretString,
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ExaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExaClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl ExaClient {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("EXA_API_KEY").ok())
            .ok_or_else(|| {
                LoomError::Config(
                    "Research API key not found. Set EXA_API_KEY env var or provide in config"
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
            model: config.deep_research_model.clone(),
            client,
        })
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_base, path);
        self.client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                LoomError::Provider(ErrorClassifier::classify(
                    &format!("Research request failed: {e}"),
                    PROVIDER_NAME,
                ))
            })
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        warn!(status, "Research API error");
        Err(LoomError::Provider(ErrorClassifier::classify_http_status(
            status,
            &text,
            PROVIDER_NAME,
        )))
    }
}

#[async_trait]
impl SearchApi for ExaClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        debug!(%query, limit, "Running synchronous search");
        let body = SearchRequest {
            query,
            num_results: limit,
            contents: ContentsSpec { text: true },
        };
        let response = self.post_json("/search", &body).await?;
        let response = self.check_status(response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse search response: {e}")))?;
        Ok(parsed.results)
    }

    async fn start_research(&self, instructions: &str, schema: &Value) -> Result<String> {
        debug!("Submitting deep-research task");
        let body = ResearchTaskRequest {
            model: &self.model,
            instructions,
            output_schema: schema,
        };
        let response = self.post_json("/research/v1", &body).await?;
        let response = self.check_status(response).await?;
        let parsed: ResearchTaskCreated = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse task response: {e}")))?;
        Ok(parsed.id)
    }

    async fn poll_research(&self, task_id: &str) -> Result<DeepTaskStatus> {
        let url = format!("{}/research/v1/{}", self.api_base, task_id);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| {
                LoomError::Provider(ErrorClassifier::classify(
                    &format!("Research poll failed: {e}"),
                    PROVIDER_NAME,
                ))
            })?;
        let response = self.check_status(response).await?;
        let parsed: ResearchTaskState = response
            .json()
            .await
            .map_err(|e| LoomError::LlmApi(format!("Failed to parse task state: {e}")))?;

        match parsed.status.as_str() {
            "running" | "pending" | "queued" => Ok(DeepTaskStatus::Running),
            "completed" => {
                let report = parsed
                    .output
                    .map(render_output)
                    .unwrap_or_default();
                Ok(DeepTaskStatus::Completed(report))
            }
            "failed" | "canceled" => {
                let message = parsed.error.unwrap_or_else(|| "task failed".to_string());
                // Schema-validation rejection is a permanent failure of the
                // requested output shape; retrying the same task cannot help.
                if message.to_lowercase().contains("schema") {
                    return Err(LoomError::SchemaRejected {
                        task_id: task_id.to_string(),
                        message,
                    });
                }
                Ok(DeepTaskStatus::Failed(message))
            }
            other => Ok(DeepTaskStatus::Failed(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Flatten a structured task output into report text
fn render_output(output: Value) -> String {
    match output {
        Value::String(s) => s,
        Value::Object(map) => {
            if let Some(Value::String(report)) = map.get("report") {
                report.clone()
            } else {
                serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
            }
        }
        other => serde_json::to_string_pretty(&other).unwrap_or_default(),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(rename = "numResults")]
    num_results: usize,
    contents: ContentsSpec,
}

#[derive(Debug, Serialize)]
struct ContentsSpec {
    text: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct ResearchTaskRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    #[serde(rename = "outputSchema")]
    output_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ResearchTaskCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResearchTaskState {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}
