//! Unified Error Type System
//!
//! Centralized error types for the generation pipeline.
//! Provides error classification for retry and fallback decisions.
//!
//! ## Error Categories
//!
//! - **RateLimit**: provider throttling (wait and retry)
//! - **CreditsExhausted**: paid provider out of credits (one-way fallback)
//! - **SchemaRejected**: deep-research output schema rejected (never retry)
//! - **Network**: connectivity issues (retry with backoff)
//! - **ParseError**: malformed LLM output (retry with adjusted prompt)
//!
//! ## Design Principles
//!
//! - Single unified error type (LoomError) for the entire crate
//! - Category-based routing for retry and fallback decisions
//! - Per-item datastore failures are logged and skipped; cycle-completion
//!   failures propagate, since they are the sole done-signal for a stage

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories for retry and fallback routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry the same provider
    RateLimit,
    /// Paid provider reported exhausted credits - disable for the run
    CreditsExhausted,
    /// Provider rejected the output schema - fatal for the task, never retry
    SchemaRejected,
    /// Authentication failed - fail fast
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Parsing provider output failed - may retry with adjusted prompt
    ParseError,
    /// Temporary server issues - retry same provider
    Transient,
    /// Unknown error - conservative retry
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::CreditsExhausted => write!(f, "CREDITS_EXHAUSTED"),
            Self::SchemaRejected => write!(f, "SCHEMA_REJECTED"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is retryable against the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError
        )
    }

    /// Check if this category should permanently disable the provider
    /// for the remainder of the run
    pub fn disables_provider(&self) -> bool {
        matches!(self, Self::CreditsExhausted | Self::Auth)
    }

    /// Get recommended retry delay for this category
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(30),
            Self::Network => Duration::from_secs(5),
            Self::Transient => Duration::from_secs(2),
            Self::ParseError => Duration::from_secs(1),
            _ => Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Provider Error
// =============================================================================

/// Provider error with category, origin, and retry hints
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// Suggested wait time before retry (if applicable)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Create a new provider error
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    /// Create error with provider context
    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Create from simple message (defaults to Unknown category)
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    /// Check if error is retryable against the same provider
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Get recommended retry delay
    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.category.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Classifier for raw error bodies returned by external providers
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> ProviderError {
        let lower = message.to_lowercase();

        // Credit exhaustion patterns (checked before generic rate limiting:
        // some providers phrase both with "quota")
        if lower.contains("credits exhausted")
            || lower.contains("insufficient credits")
            || lower.contains("out of credits")
            || lower.contains("payment required")
            || lower.contains("402")
        {
            return ProviderError::with_provider(
                ErrorCategory::CreditsExhausted,
                message,
                provider,
            );
        }

        // Schema validation rejection: the deep-research provider terminates
        // the task and will reject the same schema again
        if lower.contains("schema") && (lower.contains("invalid") || lower.contains("validation")) {
            return ProviderError::with_provider(ErrorCategory::SchemaRejected, message, provider);
        }

        // Rate limiting patterns
        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            return ProviderError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        // Authentication patterns
        if lower.contains("auth")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
        {
            return ProviderError::with_provider(ErrorCategory::Auth, message, provider);
        }

        // Network patterns
        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return ProviderError::with_provider(ErrorCategory::Network, message, provider)
                .retry_after(Duration::from_secs(5));
        }

        // Bad request patterns
        if lower.contains("400") || lower.contains("bad request") || lower.contains("malformed") {
            return ProviderError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        // Parse error patterns
        if lower.contains("parse") || lower.contains("json") || lower.contains("unexpected token") {
            return ProviderError::with_provider(ErrorCategory::ParseError, message, provider)
                .retry_after(Duration::from_secs(1));
        }

        // Transient server-side patterns
        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("500")
            || lower.contains("overloaded")
            || lower.contains("temporary")
        {
            return ProviderError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(2));
        }

        ProviderError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> ProviderError {
        match status {
            429 => ProviderError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            402 => {
                ProviderError::with_provider(ErrorCategory::CreditsExhausted, message, provider)
            }
            401 | 403 => ProviderError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 422 => {
                ProviderError::with_provider(ErrorCategory::BadRequest, message, provider)
            }
            500 | 502 | 503 | 504 => {
                ProviderError::with_provider(ErrorCategory::Transient, message, provider)
                    .retry_after(Duration::from_secs(5))
            }
            _ => ProviderError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum LoomError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Provider Errors
    // -------------------------------------------------------------------------
    /// Structured provider error with category and retry hints
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Simple LLM API error (use Provider variant for structured errors)
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Deep-research provider rejected the output schema.
    /// The provider terminates the task; retrying with the same schema
    /// would fail identically, so this always propagates.
    #[error("Deep research task {task_id} rejected schema: {message}")]
    SchemaRejected { task_id: String, message: String },

    /// Authoritative Q&A provider is out of credits for this run
    #[error("Q&A provider credits exhausted: {0}")]
    CreditsExhausted(String),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    /// Stage error with the cycle type that failed
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Blueprint validation failed: {0}")]
    BlueprintValidation(String),

    #[error("Blueprint not approved: status is '{0}'")]
    BlueprintNotApproved(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<ProviderError> for LoomError {
    fn from(err: ProviderError) -> Self {
        match err.category {
            ErrorCategory::CreditsExhausted => LoomError::CreditsExhausted(err.message),
            _ => LoomError::Provider(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoomError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl LoomError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a stage error
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create an LLM error from message (convenience wrapper)
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Provider(ProviderError::from_message(message))
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::SchemaRejected { .. } | Self::CreditsExhausted(_) => false,
            _ => false,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| LoomError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| LoomError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(
            ErrorCategory::CreditsExhausted.to_string(),
            "CREDITS_EXHAUSTED"
        );
        assert_eq!(ErrorCategory::SchemaRejected.to_string(), "SCHEMA_REJECTED");
    }

    #[test]
    fn test_category_retryable() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::SchemaRejected.is_retryable());
        assert!(!ErrorCategory::CreditsExhausted.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
    }

    #[test]
    fn test_category_disables_provider() {
        assert!(ErrorCategory::CreditsExhausted.disables_provider());
        assert!(ErrorCategory::Auth.disables_provider());
        assert!(!ErrorCategory::RateLimit.disables_provider());
    }

    #[test]
    fn test_classify_credits_exhausted() {
        let err = ErrorClassifier::classify("Your credits exhausted, upgrade plan", "qa");
        assert_eq!(err.category, ErrorCategory::CreditsExhausted);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_schema_rejection() {
        let err = ErrorClassifier::classify("output schema validation failed", "deep-research");
        assert_eq!(err.category, ErrorCategory::SchemaRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = ErrorClassifier::classify("Rate limit exceeded, please retry", "search");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.is_retryable());
        assert!(err.recommended_delay() >= Duration::from_secs(30));
    }

    #[test]
    fn test_classify_http_status() {
        let rl = ErrorClassifier::classify_http_status(429, "slow down", "wiki");
        assert_eq!(rl.category, ErrorCategory::RateLimit);

        let credits = ErrorClassifier::classify_http_status(402, "pay up", "qa");
        assert_eq!(credits.category, ErrorCategory::CreditsExhausted);

        let transient = ErrorClassifier::classify_http_status(503, "busy", "llm");
        assert_eq!(transient.category, ErrorCategory::Transient);
    }

    #[test]
    fn test_credits_exhausted_converts_to_dedicated_variant() {
        let err = ErrorClassifier::classify("insufficient credits", "qa");
        let loom: LoomError = err.into();
        assert!(matches!(loom, LoomError::CreditsExhausted(_)));
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::with_provider(ErrorCategory::RateLimit, "Too many requests", "x");
        assert_eq!(err.to_string(), "[x:RATE_LIMIT] Too many requests");
    }

    #[test]
    fn test_schema_rejected_not_recoverable() {
        let err = LoomError::SchemaRejected {
            task_id: "task-1".to_string(),
            message: "bad schema".to_string(),
        };
        assert!(!err.is_recoverable());
    }
}
