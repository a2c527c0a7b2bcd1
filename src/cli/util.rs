//! Shared command plumbing: configuration, storage, and provider wiring.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use console::style;
use tracing::info;

use crate::ai::{MetricsCollector, OpenAiEmbedder, OpenAiProvider};
use crate::config::{Config, ConfigLoader};
use crate::pipeline::{ContextPipeline, PipelineProviders, PipelineReport};
use crate::pricing::CostCalculator;
use crate::research::{ExaClient, PerplexityClient, WikipediaClient};
use crate::store::{Database, SharedDatabase};
use crate::types::Result;

/// Loaded configuration plus an initialized store, shared by every command.
pub struct CommandContext {
    pub config: Config,
    pub db: SharedDatabase,
}

impl CommandContext {
    /// Load config (explicit file, or project `contextloom.toml` + env) and
    /// open the database, running migrations if needed.
    pub fn load(config_path: Option<&Path>, db_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::new(".").load()?,
        };

        let path = db_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&config.database.path));
        let db: SharedDatabase = Arc::new(Database::open(&path)?);
        db.initialize()?;
        info!(db = %path.display(), "Store ready");

        Ok(Self { config, db })
    }

    /// Wire the pipeline from configured providers. Optional providers are
    /// included only when their keys are configured; their absence reroutes
    /// work inside the phases rather than failing here.
    pub fn pipeline(&self) -> Result<ContextPipeline> {
        let providers = PipelineProviders {
            llm: Arc::new(OpenAiProvider::new(&self.config.llm)?),
            embedder: Arc::new(OpenAiEmbedder::new(&self.config.embedding)?),
            search: if self.config.research.deep_research_available() {
                Some(Arc::new(ExaClient::new(&self.config.research)?) as _)
            } else {
                None
            },
            encyclopedia: Some(Arc::new(WikipediaClient::new()?) as _),
            qa: if self.config.qa.available() {
                Some(Arc::new(PerplexityClient::new(&self.config.qa)?) as _)
            } else {
                None
            },
        };

        Ok(ContextPipeline::new(
            self.db.clone(),
            providers,
            Arc::new(CostCalculator::new(self.config.pricing.clone())),
            Arc::new(MetricsCollector::new(format!(
                "run-{}",
                Utc::now().format("%Y%m%d-%H%M%S")
            ))),
        ))
    }
}

/// Render a run report to the console
pub fn print_report(report: &PipelineReport) {
    println!();
    println!("{}", style("Context database ready").green().bold());
    println!("  Event:     {}", report.event_id);
    println!("  Agent:     {}", report.agent_id);
    println!("  Blueprint: {}", report.blueprint_id);
    println!();
    println!("  Research results: {}", report.research_results);
    println!("  Glossary terms:   {}", report.glossary_terms);
    println!("  Context chunks:   {}", report.context_items);
    if report.documents > 0 {
        println!("  Source documents: {}", report.documents);
    }
    println!();
    println!("{}", style(report.metrics.display()).dim());
}
