//! AI Provider Layer
//!
//! Chat and embedding providers, retry policy, output parsing, and usage
//! metrics.

pub mod embedding;
pub mod metrics;
pub mod provider;
pub mod retry;
pub mod validation;

pub use embedding::{EmbeddingProvider, OpenAiEmbedder, SharedEmbedder};
pub use metrics::{MetricsCollector, MetricsSummary, SharedMetrics, StageMetrics};
pub use provider::{
    supports_temperature, ChatProvider, ChatRequest, LlmResponse, OpenAiProvider,
    ResponseMetadata, ResponseTiming, SharedProvider, TokenUsage,
};
pub use retry::{with_retry, with_retry_times};
pub use validation::extract_json_from_response;
