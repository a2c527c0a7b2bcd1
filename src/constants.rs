//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Blueprint generation constants
pub mod blueprint {
    /// Maximum chat attempts (1 initial + 2 retries)
    pub const MAX_ATTEMPTS: usize = 3;

    /// Temperature for the first attempt
    pub const INITIAL_TEMPERATURE: f32 = 0.7;

    /// Per-attempt temperatures, listed exactly as sent to the provider
    pub const ATTEMPT_TEMPERATURES: [f32; MAX_ATTEMPTS] = [0.7, 0.5, 0.3];

    /// Minimum cardinalities enforced after validation
    pub const MIN_IMPORTANT_DETAILS: usize = 5;
    pub const MIN_INFERRED_TOPICS: usize = 5;
    pub const MIN_KEY_TERMS: usize = 10;
    pub const MIN_RESEARCH_QUERIES: usize = 5;
    pub const MIN_GLOSSARY_TERMS: usize = 10;
    pub const MIN_CHUNK_SOURCES: usize = 3;

    /// Quality tier target-count consistency bounds
    pub const COMPREHENSIVE_MIN_TARGET: usize = 1000;
    pub const BASIC_MAX_TARGET: usize = 500;
}

/// Research phase constants
pub mod research {
    /// Priority at or below which a query routes to deep research
    pub const DEEP_RESEARCH_MAX_PRIORITY: u8 = 2;

    /// Maximum results requested per synchronous search
    pub const SEARCH_RESULT_LIMIT: usize = 5;

    /// Segmentation window for result text (words)
    pub const CHUNK_MIN_WORDS: usize = 200;
    pub const CHUNK_MAX_WORDS: usize = 400;

    /// Interval between polls of pending deep-research tasks
    pub const POLL_INTERVAL_SECS: u64 = 10;

    /// Maximum age of a pending task before sync-search fallback
    pub const POLL_TIMEOUT_SECS: u64 = 300;

    /// Base heuristic quality score for a retrieved chunk
    pub const QUALITY_BASE: f64 = 0.5;

    /// Bonus per quality signal (long title, rich metadata, word count)
    pub const QUALITY_SIGNAL_BONUS: f64 = 0.1;

    /// Title length above which the title signal fires
    pub const QUALITY_TITLE_THRESHOLD: usize = 20;

    /// Word count above which the length signal fires
    pub const QUALITY_WORD_THRESHOLD: usize = 150;

    /// Number of stub chunks fabricated when no deep-research key exists
    pub const STUB_CHUNK_COUNT: usize = 3;
}

/// Encyclopedia lookup constants
pub mod encyclopedia {
    /// Minimum interval between consecutive lookups (milliseconds)
    pub const MIN_CALL_INTERVAL_MS: u64 = 300;

    /// Attempts on rate-limit responses
    pub const MAX_ATTEMPTS: usize = 3;

    /// Base backoff delay, doubled per attempt (milliseconds)
    pub const BACKOFF_BASE_MS: u64 = 500;
}

/// Glossary phase constants
pub mod glossary {
    /// Terms processed per sequential batch
    pub const BATCH_SIZE: usize = 5;

    /// Priority band that qualifies for the authoritative Q&A path
    pub const QA_MAX_PRIORITY: u8 = 1;

    /// Research snippets supplied to definition prompts
    pub const SNIPPET_LIMIT: usize = 3;
}

/// Chunks phase constants
pub mod chunks {
    /// Embedding requests issued concurrently per batch
    pub const EMBED_BATCH_SIZE: usize = 10;

    /// Ranking weights; must sum to 1.0
    pub const WEIGHT_SOURCE_PRIORITY: f64 = 0.50;
    pub const WEIGHT_QUALITY: f64 = 0.35;
    pub const WEIGHT_AGENT_MATCH: f64 = 0.10;
    pub const WEIGHT_QUERY_PRIORITY: f64 = 0.05;
}

/// Embedding provider constants
pub mod embedding {
    /// Maximum input length accepted by the provider (characters).
    /// Longer inputs are truncated, never rejected.
    pub const MAX_INPUT_CHARS: usize = 32_000;

    /// Expected vector length
    pub const DIMENSIONS: usize = 1536;
}

/// LLM chat retry constants
pub mod chat {
    /// Default maximum retries for a chat call
    pub const DEFAULT_MAX_RETRIES: usize = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
