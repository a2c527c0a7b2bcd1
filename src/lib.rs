//! ContextLoom - Versioned Context-Database Generation
//!
//! Builds a per-event context database for downstream agents: an LLM-planned
//! blueprint, multi-provider research, a glossary of event terminology, and a
//! ranked, embedded chunk set. Every stage runs under a generation cycle, so
//! regeneration supersedes prior results instead of deleting them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use contextloom::{ContextPipeline, Database, PipelineProviders};
//!
//! let db = Arc::new(Database::open("contextloom.db")?);
//! db.initialize()?;
//! let pipeline = ContextPipeline::new(db, providers, costs, metrics);
//! let report = pipeline.generate("Solar Summit 2026", None, "briefing").await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: chat and embedding providers, retry policy, usage metrics
//! - [`research`]: search, deep-research, encyclopedia, and Q&A providers
//! - [`pipeline`]: the four generation stages and their orchestrator
//! - [`store`]: SQLite persistence with cycle-aware reads
//! - [`config`]: layered configuration (defaults, TOML, environment)

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod extract;
pub mod pipeline;
pub mod pricing;
pub mod research;
pub mod store;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, PricingConfig};

// Error Types
pub use types::{ErrorCategory, LoomError, Result, ResultExt};

// Storage
pub use store::database::PoolConfig;
pub use store::{Database, SharedDatabase};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use pipeline::{
    BlueprintGenerator, ChunksPhase, ContextPipeline, GenerationCycleManager, GlossaryPhase,
    PipelineProviders, PipelineReport, ResearchPhase,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    ChatProvider, EmbeddingProvider, LlmResponse, MetricsCollector, OpenAiEmbedder,
    OpenAiProvider, SharedEmbedder, SharedMetrics, SharedProvider,
};

pub use pricing::CostCalculator;

// =============================================================================
// Research Provider Re-exports
// =============================================================================

pub use research::{
    Encyclopedia, ExaClient, PerplexityClient, QaApi, SearchApi, WikipediaClient,
};
