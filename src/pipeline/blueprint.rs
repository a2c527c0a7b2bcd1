//! Blueprint Generation
//!
//! Produces the validated plan that drives every downstream phase. The LLM is
//! asked for a strict JSON object; output below the minimum cardinalities is
//! retried at decreasing temperature, and after the retry budget the
//! normalizer repairs the last parse so downstream phases always receive at
//! least one unit of work.

use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::{extract_json_from_response, ChatRequest, SharedMetrics, SharedProvider, TokenUsage};
use crate::constants::blueprint as limits;
use crate::pricing::CostCalculator;
use crate::types::{
    AgentId, Blueprint, BlueprintStatus, ChunksPlan, EventId, GlossaryTermPlan, QualityTier,
    ResearchApi, ResearchQuery, Result,
};

const RETRY_INSTRUCTION: &str = "\n\nIMPORTANT: Do not return empty arrays. Every array field \
     must contain at least the minimum number of entries described above.";

/// Outcome of one blueprint generation run
pub struct GeneratedBlueprint {
    pub blueprint: Blueprint,
    /// Token usage accumulated across all attempts, not just the final parse
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub attempts: usize,
}

/// LLM-backed blueprint generator with retry and normalization.
pub struct BlueprintGenerator {
    llm: SharedProvider,
    costs: Arc<CostCalculator>,
    metrics: SharedMetrics,
}

impl BlueprintGenerator {
    pub fn new(llm: SharedProvider, costs: Arc<CostCalculator>, metrics: SharedMetrics) -> Self {
        Self {
            llm,
            costs,
            metrics,
        }
    }

    /// Generate a blueprint for one event+agent pair.
    ///
    /// Document text, when present, grounds the plan; its absence is normal.
    /// An LLM transport error on the final attempt propagates; the caller
    /// marks the blueprint and cycle failed.
    pub async fn generate(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        title: &str,
        topic: &str,
        document_text: Option<&str>,
    ) -> Result<GeneratedBlueprint> {
        let system = system_prompt();
        let base_prompt = user_prompt(title, topic, document_text);

        let mut usage = TokenUsage::default();
        let mut cost_usd = 0.0;
        let mut last_parse: Option<Blueprint> = None;

        for attempt in 1..=limits::MAX_ATTEMPTS {
            let temperature = limits::ATTEMPT_TEMPERATURES[attempt - 1];
            let mut prompt = base_prompt.clone();
            if attempt > 1 {
                prompt.push_str(RETRY_INSTRUCTION);
            }

            let request = ChatRequest::json(prompt)
                .with_system(system.clone())
                .with_temperature(temperature);

            let response = match self.llm.complete(&request).await {
                Ok(response) => response,
                Err(e) if attempt == limits::MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Blueprint chat call failed, retrying");
                    continue;
                }
            };

            let call_cost = self.costs.chat_cost(
                self.llm.model(),
                response.usage.input_tokens as u64,
                response.usage.output_tokens as u64,
            );
            self.metrics.record_response(&response, call_cost);
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;
            cost_usd += call_cost;

            let parsed: Blueprint = match extract_json_from_response(&response.content)
                .and_then(|value| serde_json::from_value(value).map_err(Into::into))
            {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(attempt, error = %e, "Blueprint response was not valid JSON");
                    continue;
                }
            };

            let violations = validate(&parsed);
            if violations.is_empty() {
                info!(attempt, "Blueprint passed validation");
                return Ok(self.finish(event_id, agent_id, topic, parsed, usage, cost_usd, attempt));
            }

            warn!(attempt, ?violations, "Blueprint below minimum cardinality");
            last_parse = Some(parsed);
        }

        // Retries exhausted; repair whatever the last attempt produced
        let parsed = last_parse.unwrap_or_else(|| Blueprint::new(event_id.clone(), agent_id.clone()));
        let repaired = normalize(topic, parsed);
        Ok(self.finish(
            event_id,
            agent_id,
            topic,
            repaired,
            usage,
            cost_usd,
            limits::MAX_ATTEMPTS,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        topic: &str,
        parsed: Blueprint,
        usage: TokenUsage,
        cost_usd: f64,
        attempts: usize,
    ) -> GeneratedBlueprint {
        let mut blueprint =
            Blueprint::new(event_id.clone(), agent_id.clone()).with_content(parsed);
        enforce_tier_consistency(&mut blueprint.chunks_plan);

        // LLM cost estimates are advisory; compute our own when absent
        if blueprint.cost_breakdown.total <= 0.0 {
            let deep_tasks = blueprint
                .research_plan
                .queries
                .iter()
                .filter(|q| q.priority <= crate::constants::research::DEEP_RESEARCH_MAX_PRIORITY)
                .count();
            let sync_queries = blueprint.research_plan.queries.len() - deep_tasks;
            blueprint.cost_breakdown = self.costs.estimate_blueprint(
                deep_tasks,
                sync_queries,
                blueprint.glossary_plan.terms.len(),
                blueprint.chunks_plan.target_count,
            );
        }

        blueprint.status = BlueprintStatus::Ready;
        info!(
            blueprint_id = %blueprint.id,
            %topic,
            attempts,
            queries = blueprint.research_plan.queries.len(),
            terms = blueprint.glossary_plan.terms.len(),
            "Blueprint ready"
        );

        GeneratedBlueprint {
            blueprint,
            usage,
            cost_usd,
            attempts,
        }
    }
}

// =============================================================================
// Prompts
// =============================================================================

fn system_prompt() -> String {
    "You are a research planning assistant. Given an event, you produce a \
     complete generation plan as a single JSON object with these fields: \
     important_details (array of at least 5 strings), inferred_topics (at \
     least 5 strings), key_terms (at least 10 strings), research_plan \
     {queries: [{query, priority, api, rationale, agent_utility}], \
     total_searches, estimated_total_cost} with at least 5 queries, \
     glossary_plan {terms: [{term, priority, category}], estimated_count} \
     with at least 10 terms, chunks_plan {sources, target_count, \
     quality_tier, ranking_strategy} with at least 3 sources, and \
     cost_breakdown {research, glossary, chunks, total}. Respond with JSON \
     only."
        .to_string()
}

fn user_prompt(title: &str, topic: &str, document_text: Option<&str>) -> String {
    let mut prompt = format!(
        "Plan the context database for this event.\n\nTitle: {title}\nTopic: {topic}\n"
    );
    if let Some(text) = document_text.filter(|t| !t.trim().is_empty()) {
        prompt.push_str("\nUploaded document excerpts:\n");
        prompt.push_str(text);
        prompt.push('\n');
    }
    prompt
}

// =============================================================================
// Validation and Normalization
// =============================================================================

/// Check the six minimum-cardinality rules; returns the violated field names
fn validate(blueprint: &Blueprint) -> Vec<&'static str> {
    let mut violations = Vec::new();
    if count_non_blank(&blueprint.important_details) < limits::MIN_IMPORTANT_DETAILS {
        violations.push("important_details");
    }
    if count_non_blank(&blueprint.inferred_topics) < limits::MIN_INFERRED_TOPICS {
        violations.push("inferred_topics");
    }
    if count_non_blank(&blueprint.key_terms) < limits::MIN_KEY_TERMS {
        violations.push("key_terms");
    }
    if blueprint.research_plan.queries.len() < limits::MIN_RESEARCH_QUERIES {
        violations.push("research_plan.queries");
    }
    if blueprint.glossary_plan.terms.len() < limits::MIN_GLOSSARY_TERMS {
        violations.push("glossary_plan.terms");
    }
    if count_non_blank(&blueprint.chunks_plan.sources) < limits::MIN_CHUNK_SOURCES {
        violations.push("chunks_plan.sources");
    }
    violations
}

fn count_non_blank(entries: &[String]) -> usize {
    entries.iter().filter(|e| !e.trim().is_empty()).count()
}

/// Deterministic fallback entry for a drained important_details array
pub(crate) fn fallback_detail(topic: &str) -> String {
    format!("Event focuses on {topic} - content generation failed, please regenerate blueprint")
}

/// Repair a blueprint that never passed validation.
///
/// Blank entries are dropped; any array left empty receives one deterministic
/// topic-derived entry so every downstream phase has at least one unit of
/// work. Arrays that are merely short are kept as-is.
pub(crate) fn normalize(topic: &str, mut blueprint: Blueprint) -> Blueprint {
    retain_non_blank(&mut blueprint.important_details);
    retain_non_blank(&mut blueprint.inferred_topics);
    retain_non_blank(&mut blueprint.key_terms);
    retain_non_blank(&mut blueprint.chunks_plan.sources);
    blueprint
        .research_plan
        .queries
        .retain(|q| !q.query.trim().is_empty());
    blueprint
        .glossary_plan
        .terms
        .retain(|t| !t.term.trim().is_empty());

    if blueprint.important_details.is_empty() {
        blueprint.important_details.push(fallback_detail(topic));
    }
    if blueprint.inferred_topics.is_empty() {
        blueprint.inferred_topics.push(topic.to_string());
    }
    if blueprint.key_terms.is_empty() {
        blueprint.key_terms.push(topic.to_string());
    }
    if blueprint.research_plan.queries.is_empty() {
        blueprint.research_plan.queries.push(ResearchQuery {
            query: format!("{topic} overview and key facts"),
            priority: 3,
            api: ResearchApi::WebSearch,
            rationale: None,
            agent_utility: Vec::new(),
        });
    }
    if blueprint.research_plan.total_searches == 0 {
        blueprint.research_plan.total_searches = blueprint.research_plan.queries.len();
    }
    if blueprint.glossary_plan.terms.is_empty() {
        blueprint.glossary_plan.terms.push(GlossaryTermPlan {
            term: topic.to_string(),
            priority: 2,
            category: None,
        });
    }
    if blueprint.glossary_plan.estimated_count == 0 {
        blueprint.glossary_plan.estimated_count = blueprint.glossary_plan.terms.len();
    }
    if blueprint.chunks_plan.sources.is_empty() {
        blueprint
            .chunks_plan
            .sources
            .push("web_search".to_string());
    }
    if blueprint.chunks_plan.target_count == 0 {
        blueprint.chunks_plan.target_count = 1;
    }

    blueprint
}

fn retain_non_blank(entries: &mut Vec<String>) {
    entries.retain(|e| !e.trim().is_empty());
}

/// Quality tier and target count must agree; the tier wins on conflict
pub(crate) fn enforce_tier_consistency(plan: &mut ChunksPlan) {
    match plan.quality_tier {
        QualityTier::Comprehensive if plan.target_count < limits::COMPREHENSIVE_MIN_TARGET => {
            plan.target_count = limits::COMPREHENSIVE_MIN_TARGET;
        }
        QualityTier::Basic if plan.target_count > limits::BASIC_MAX_TARGET => {
            plan.target_count = limits::BASIC_MAX_TARGET;
        }
        _ => {}
    }
}
