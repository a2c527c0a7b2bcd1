//! Chunks Phase
//!
//! Builds the ranked, embedded chunk set. Candidates come from active
//! research results, topped up with LLM filler when research alone cannot
//! reach the blueprint's target count. Candidates are ranked by a weighted
//! composite score, assigned dense 1-based ranks, embedded in concurrent
//! batches, and persisted.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::ai::embedding::truncate_input;
use crate::ai::{extract_json_from_response, ChatRequest, SharedEmbedder, SharedMetrics, SharedProvider};
use crate::constants::chunks as tuning;
use crate::constants::embedding;
use crate::pipeline::cycle::GenerationCycleManager;
use crate::pricing::CostCalculator;
use crate::store::SharedDatabase;
use crate::types::{
    Blueprint, ChunkMetadata, ChunkSource, ContextItem, CycleRef, GenerationCycle, ResearchApi,
    Result,
};

/// One unranked candidate chunk
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub text: String,
    pub source: ChunkSource,
    pub quality: f64,
    pub agent_utility: Vec<String>,
    pub query_priority: u8,
    pub source_url: Option<String>,
    pub research_source: Option<String>,
}

/// Runs the chunks stage of one generation cycle.
pub struct ChunksPhase {
    db: SharedDatabase,
    llm: SharedProvider,
    embedder: SharedEmbedder,
    cycles: GenerationCycleManager,
    costs: Arc<CostCalculator>,
    metrics: SharedMetrics,
}

impl ChunksPhase {
    pub fn new(
        db: SharedDatabase,
        llm: SharedProvider,
        embedder: SharedEmbedder,
        cycles: GenerationCycleManager,
        costs: Arc<CostCalculator>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            db,
            llm,
            embedder,
            cycles,
            costs,
            metrics,
        }
    }

    /// Build, rank, embed, and persist the chunk set.
    /// Returns the number of context items inserted.
    pub async fn run(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        agent_tags: &[String],
    ) -> Result<usize> {
        let target = blueprint.chunks_plan.target_count.max(1);
        let mut candidates = self.research_candidates(blueprint)?;
        info!(
            cycle_id = %cycle.id,
            research = candidates.len(),
            target,
            "Chunks phase starting"
        );

        let shortfall = target.saturating_sub(candidates.len());
        if shortfall > 0 {
            let filler = self.generate_filler(blueprint, shortfall).await;
            info!(requested = shortfall, produced = filler.len(), "LLM filler generated");
            candidates.extend(filler);
        }

        let selected = rank_candidates(candidates, agent_tags, target);
        let items: Vec<ContextItem> = selected
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| build_item(blueprint, cycle, candidate, index + 1))
            .collect();

        let inserted = self.embed_and_insert(cycle, items).await?;

        self.cycles
            .attach_metadata(&cycle.id, &json!({ "chunks_inserted": inserted }))?;
        info!(cycle_id = %cycle.id, inserted, "Chunks phase finished");
        Ok(inserted)
    }

    /// Active research results as trimmed, non-empty candidates
    fn research_candidates(&self, blueprint: &Blueprint) -> Result<Vec<Candidate>> {
        let results = self.db.research_for_blueprint(&blueprint.id)?;
        Ok(results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .map(|r| Candidate {
                text: r.content.trim().to_string(),
                source: source_for_api(r.api),
                quality: r.quality_score,
                agent_utility: r.metadata.agent_utility.clone(),
                query_priority: r.metadata.priority,
                source_url: r.source_url.clone(),
                research_source: r.metadata.provenance.clone(),
            })
            .collect())
    }

    /// One JSON chat call asking for exactly the shortfall.
    /// Malformed or empty output yields zero filler, never an error.
    async fn generate_filler(&self, blueprint: &Blueprint, count: usize) -> Vec<Candidate> {
        let topics = blueprint.inferred_topics.join(", ");
        let prompt = format!(
            "Write exactly {count} short context passages (2-4 sentences each) covering these \
             topics: {topics}.\nRespond with a JSON array of {count} strings."
        );
        let response = match self.llm.complete(&ChatRequest::json(prompt)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Filler generation failed, continuing without filler");
                return Vec::new();
            }
        };
        let cost = self.costs.chat_cost(
            self.llm.model(),
            response.usage.input_tokens as u64,
            response.usage.output_tokens as u64,
        );
        self.metrics.record_response(&response, cost);

        let passages: Vec<String> = extract_json_from_response(&response.content)
            .ok()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        passages
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .map(|text| Candidate {
                text,
                source: ChunkSource::LlmFiller,
                quality: crate::constants::research::QUALITY_BASE,
                agent_utility: Vec::new(),
                query_priority: 3,
                source_url: None,
                research_source: Some("llm_filler".to_string()),
            })
            .collect()
    }

    /// Embed in concurrent batches and insert.
    ///
    /// Per-item embed or insert failures are logged and skipped; the caller
    /// is responsible for the cycle-completion transition, whose failure is
    /// fatal because it is the readiness signal for consumers.
    async fn embed_and_insert(
        &self,
        cycle: &GenerationCycle,
        mut items: Vec<ContextItem>,
    ) -> Result<usize> {
        let total = items.len();
        let mut inserted = 0usize;
        let mut done = 0usize;

        for batch in items.chunks_mut(tuning::EMBED_BATCH_SIZE) {
            let embeds = join_all(batch.iter().map(|item| {
                let input = truncate_input(&item.chunk, embedding::MAX_INPUT_CHARS);
                self.embedder.embed(input)
            }))
            .await;

            for (item, embed) in batch.iter_mut().zip(embeds) {
                done += 1;
                match embed {
                    Ok(vector) => {
                        // Rough token estimate for cost accounting
                        self.metrics
                            .record_flat_cost(self.costs.embedding_cost((item.chunk.len() / 4) as u64));
                        item.embedding = vector;
                        match self.db.insert_context_item(item) {
                            Ok(()) => inserted += 1,
                            Err(e) => {
                                warn!(rank = item.rank, error = %e, "Failed to insert chunk, skipping")
                            }
                        }
                    }
                    Err(e) => {
                        warn!(rank = item.rank, error = %e, "Embedding failed, skipping chunk")
                    }
                }
            }
            self.cycles.set_progress(&cycle.id, done, total)?;
        }

        Ok(inserted)
    }
}

// =============================================================================
// Ranking
// =============================================================================

fn source_for_api(api: ResearchApi) -> ChunkSource {
    match api {
        ResearchApi::WebSearch => ChunkSource::WebSearch,
        ResearchApi::DeepResearch => ChunkSource::DeepResearch,
        ResearchApi::Encyclopedia => ChunkSource::Encyclopedia,
        ResearchApi::Llm => ChunkSource::LlmFiller,
    }
}

/// Weighted composite ranking score in [0, 1]
pub(crate) fn composite_score(candidate: &Candidate, agent_tags: &[String]) -> f64 {
    let agent_match = if candidate
        .agent_utility
        .iter()
        .any(|tag| agent_tags.iter().any(|agent| agent.eq_ignore_ascii_case(tag)))
    {
        1.0
    } else {
        0.0
    };
    // Priority 1 earns the full bonus, tailing off to zero at 4+
    let priority_bonus = (4.0 - f64::from(candidate.query_priority.clamp(1, 4))) / 3.0;

    tuning::WEIGHT_SOURCE_PRIORITY * candidate.source.priority_score()
        + tuning::WEIGHT_QUALITY * candidate.quality
        + tuning::WEIGHT_AGENT_MATCH * agent_match
        + tuning::WEIGHT_QUERY_PRIORITY * priority_bonus
}

/// Sort descending by composite score and keep the top `target`
pub(crate) fn rank_candidates(
    candidates: Vec<Candidate>,
    agent_tags: &[String],
    target: usize,
) -> Vec<(Candidate, f64)> {
    let mut scored: Vec<(Candidate, f64)> = candidates
        .into_iter()
        .map(|candidate| {
            let score = composite_score(&candidate, agent_tags);
            (candidate, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(target);
    scored
}

fn build_item(
    blueprint: &Blueprint,
    cycle: &GenerationCycle,
    (candidate, score): (Candidate, f64),
    rank: usize,
) -> ContextItem {
    let chunk_size = candidate.text.len();
    let mut item = ContextItem::new(
        blueprint.event_id.clone(),
        CycleRef::from(cycle.id.clone()),
        candidate.text,
        candidate.source,
    );
    item.rank = rank;
    item.metadata = ChunkMetadata {
        research_source: candidate.research_source,
        source_url: candidate.source_url,
        quality_score: candidate.quality,
        composite_score: score,
        chunk_size,
        agent_utility: candidate.agent_utility,
        query_priority: candidate.query_priority,
    };
    item
}
