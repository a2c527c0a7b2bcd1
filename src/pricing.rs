//! Cost Estimation
//!
//! Pure calculator over the configured pricing table. Estimates feed the
//! blueprint's cost breakdown; actual spend is tracked by `ai::metrics`.

use crate::config::{ModelRate, PricingConfig};
use crate::types::CostBreakdown;

/// Estimates USD cost for planned and completed provider calls
#[derive(Debug, Clone)]
pub struct CostCalculator {
    pricing: PricingConfig,
}

impl CostCalculator {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    /// Rate for a model, matching by longest configured prefix
    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.pricing
            .models
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.pricing.fallback)
    }

    /// USD for one chat call
    pub fn chat_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let rate = self.rate_for(model);
        (input_tokens as f64 / 1_000_000.0) * rate.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * rate.output_per_million
    }

    /// USD for one embedding call
    pub fn embedding_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1_000_000.0) * self.pricing.embedding_per_million
    }

    pub fn search_cost(&self, queries: usize) -> f64 {
        queries as f64 * self.pricing.search_per_query
    }

    pub fn deep_research_cost(&self, tasks: usize) -> f64 {
        tasks as f64 * self.pricing.deep_research_per_task
    }

    pub fn qa_cost(&self, calls: usize) -> f64 {
        calls as f64 * self.pricing.qa_per_call
    }

    /// Pre-execution estimate for a planned blueprint.
    ///
    /// `deep_tasks` and `sync_queries` partition the research plan;
    /// `glossary_terms` assumes one Q&A call per term; `chunk_count` assumes
    /// one embedding call of roughly 300 tokens per chunk.
    pub fn estimate_blueprint(
        &self,
        deep_tasks: usize,
        sync_queries: usize,
        glossary_terms: usize,
        chunk_count: usize,
    ) -> CostBreakdown {
        let research = self.deep_research_cost(deep_tasks) + self.search_cost(sync_queries);
        let glossary = self.qa_cost(glossary_terms);
        let chunks = self.embedding_cost(chunk_count as u64 * 300);
        CostBreakdown {
            research,
            glossary,
            chunks,
            total: 0.0,
        }
        .with_total()
    }
}
