//! Configuration
//!
//! Layered configuration (defaults, TOML file, environment) for providers,
//! pricing, and storage.

mod loader;
mod types;

pub use loader::{ConfigLoader, CONFIG_FILE_NAME, ENV_PREFIX};
pub use types::{
    Config, DatabaseConfig, EmbeddingConfig, LlmConfig, ModelRate, PricingConfig, QaConfig,
    ResearchConfig,
};
