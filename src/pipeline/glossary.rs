//! Glossary Phase
//!
//! Expands the blueprint's glossary plan into structured term definitions.
//! Top-priority terms go through the authoritative Q&A provider (until its
//! credits run out) with an LLM polish pass; everything else is LLM-only.
//! Both paths are grounded in the most relevant research snippets, and
//! persistence is a case-insensitive upsert per event.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::ai::{extract_json_from_response, ChatRequest, SharedMetrics, SharedProvider};
use crate::constants::glossary as tuning;
use crate::pipeline::cycle::GenerationCycleManager;
use crate::pricing::CostCalculator;
use crate::research::SharedQaApi;
use crate::store::SharedDatabase;
use crate::types::{
    Blueprint, CycleRef, GenerationCycle, GlossaryTerm, GlossaryTermPlan, LoomError,
    ResearchResult, Result, TermDefinition,
};

/// One resolved definition with its provenance
struct DefinedTerm {
    definition: TermDefinition,
    source: &'static str,
    source_url: Option<String>,
    cost_usd: f64,
}

/// Runs the glossary stage of one generation cycle.
pub struct GlossaryPhase {
    db: SharedDatabase,
    llm: SharedProvider,
    qa: Option<SharedQaApi>,
    cycles: GenerationCycleManager,
    costs: Arc<CostCalculator>,
    metrics: SharedMetrics,
}

impl GlossaryPhase {
    pub fn new(
        db: SharedDatabase,
        llm: SharedProvider,
        qa: Option<SharedQaApi>,
        cycles: GenerationCycleManager,
        costs: Arc<CostCalculator>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            db,
            llm,
            qa,
            cycles,
            costs,
            metrics,
        }
    }

    /// Define and upsert every planned term. Returns the upserted count.
    pub async fn run(&self, blueprint: &Blueprint, cycle: &GenerationCycle) -> Result<usize> {
        let snippets = self.db.research_for_blueprint(&blueprint.id)?;
        let terms = &blueprint.glossary_plan.terms;
        let total = terms.len();
        info!(cycle_id = %cycle.id, total, "Glossary phase starting");

        let mut upserted = 0usize;
        let mut processed = 0usize;
        let mut stage_cost = 0.0;

        // Sequential batches to stay inside provider rate limits
        for batch in terms.chunks(tuning::BATCH_SIZE) {
            for plan in batch {
                match self.define_term(plan, &snippets).await {
                    Ok(defined) => {
                        stage_cost += defined.cost_usd;
                        let mut term = GlossaryTerm::from_definition(
                            blueprint.event_id.clone(),
                            CycleRef::from(cycle.id.clone()),
                            plan.term.clone(),
                            defined.definition,
                            defined.source,
                        );
                        term.source_url = defined.source_url;
                        match self.db.upsert_glossary_term(&term) {
                            Ok(()) => upserted += 1,
                            Err(e) => {
                                warn!(term = %plan.term, error = %e, "Failed to upsert glossary term")
                            }
                        }
                    }
                    Err(e) => warn!(term = %plan.term, error = %e, "Failed to define term, skipping"),
                }
                processed += 1;
                self.cycles.set_progress(&cycle.id, processed, total)?;
            }
        }

        self.cycles.attach_metadata(
            &cycle.id,
            &json!({ "glossary_cost": stage_cost, "terms_processed": processed }),
        )?;
        info!(cycle_id = %cycle.id, upserted, "Glossary phase finished");
        Ok(upserted)
    }

    /// Resolve one term via the Q&A path or LLM-only fallback
    async fn define_term(
        &self,
        plan: &GlossaryTermPlan,
        snippets: &[ResearchResult],
    ) -> Result<DefinedTerm> {
        let selected = select_snippets(&plan.term, snippets);

        if let Some(qa) = &self.qa {
            if plan.priority <= tuning::QA_MAX_PRIORITY && !qa.is_disabled() {
                let question = format!(
                    "Define the term \"{}\" precisely. Include what it stands for if it is an \
                     acronym, and one or two usage examples.",
                    plan.term
                );
                match qa.ask(&question).await {
                    Ok(answer) => {
                        let qa_cost = self.costs.qa_cost(1);
                        self.metrics.record_flat_cost(qa_cost);
                        let (definition, polish_cost) =
                            self.polish(plan, &answer.content, &selected).await?;
                        return Ok(DefinedTerm {
                            definition,
                            source: "qa",
                            source_url: answer.citations.first().cloned(),
                            cost_usd: qa_cost + polish_cost,
                        });
                    }
                    Err(LoomError::CreditsExhausted(_)) => {
                        // The client latch is tripped; remaining terms skip
                        // straight to the LLM path
                        warn!(term = %plan.term, "Q&A credits exhausted, switching to LLM-only definitions");
                    }
                    Err(e) => {
                        warn!(term = %plan.term, error = %e, "Q&A call failed, using LLM definition");
                    }
                }
            }
        }

        let (definition, cost_usd) = self.llm_define(plan, &selected).await?;
        Ok(DefinedTerm {
            definition,
            source: "llm",
            source_url: None,
            cost_usd,
        })
    }

    /// Turn a raw Q&A answer into the structured definition shape
    async fn polish(
        &self,
        plan: &GlossaryTermPlan,
        raw_answer: &str,
        snippets: &[&ResearchResult],
    ) -> Result<(TermDefinition, f64)> {
        let prompt = format!(
            "Rewrite this answer about the term \"{term}\" into a JSON object with fields: \
             definition (string), acronym_for (string or null), category (string or null), \
             usage_examples (array of strings), related_terms (array of strings), \
             confidence_score (0.0-1.0).\n\nAnswer:\n{raw_answer}\n{context}",
            term = plan.term,
            context = snippet_context(snippets),
        );
        self.chat_definition(prompt).await
    }

    /// Generate a definition from the LLM alone
    async fn llm_define(
        &self,
        plan: &GlossaryTermPlan,
        snippets: &[&ResearchResult],
    ) -> Result<(TermDefinition, f64)> {
        let category = plan
            .category
            .as_deref()
            .map(|c| format!(" (category: {c})"))
            .unwrap_or_default();
        let prompt = format!(
            "Define the term \"{term}\"{category} as a JSON object with fields: definition \
             (string), acronym_for (string or null), category (string or null), usage_examples \
             (array of strings), related_terms (array of strings), confidence_score \
             (0.0-1.0).\n{context}",
            term = plan.term,
            context = snippet_context(snippets),
        );
        self.chat_definition(prompt).await
    }

    async fn chat_definition(&self, prompt: String) -> Result<(TermDefinition, f64)> {
        let request = ChatRequest::json(prompt);
        let response = self.llm.complete(&request).await?;
        let cost = self.costs.chat_cost(
            self.llm.model(),
            response.usage.input_tokens as u64,
            response.usage.output_tokens as u64,
        );
        self.metrics.record_response(&response, cost);

        let definition: TermDefinition = extract_json_from_response(&response.content)
            .and_then(|value| serde_json::from_value(value).map_err(Into::into))?;
        if definition.definition.trim().is_empty() {
            return Err(LoomError::LlmApi(
                "definition response had no definition text".to_string(),
            ));
        }
        Ok((definition, cost))
    }
}

/// Pick the research snippets most relevant to a term.
///
/// Relevance is term-word overlap plus an exact-case acronym match; relevant
/// snippets are then ordered by relevance, recorded quality, and declared
/// agent-utility tags. When nothing is relevant the first few chunks are
/// returned so prompts are never unglossed.
pub(crate) fn select_snippets<'a>(
    term: &str,
    chunks: &'a [ResearchResult],
) -> Vec<&'a ResearchResult> {
    let term_words: Vec<String> = term
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    let is_acronym = term.len() >= 2 && term.chars().all(|c| c.is_ascii_uppercase());

    let mut scored: Vec<(f64, &ResearchResult)> = chunks
        .iter()
        .map(|chunk| {
            let content_lower = chunk.content.to_lowercase();
            let overlap = term_words
                .iter()
                .filter(|word| content_lower.contains(word.as_str()))
                .count() as f64;
            let acronym_bonus = if is_acronym && chunk.content.contains(term) {
                1.0
            } else {
                0.0
            };
            let relevance = overlap + acronym_bonus;
            let score = if relevance > 0.0 {
                let utility_bonus = if chunk.metadata.agent_utility.is_empty() {
                    0.0
                } else {
                    0.25
                };
                relevance + chunk.quality_score + utility_bonus
            } else {
                0.0
            };
            (score, chunk)
        })
        .collect();

    if scored.iter().all(|(score, _)| *score == 0.0) {
        debug!(%term, "No snippet scored above zero, using leading chunks");
        return chunks.iter().take(tuning::SNIPPET_LIMIT).collect();
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .filter(|(score, _)| *score > 0.0)
        .take(tuning::SNIPPET_LIMIT)
        .map(|(_, chunk)| chunk)
        .collect()
}

fn snippet_context(snippets: &[&ResearchResult]) -> String {
    if snippets.is_empty() {
        return String::new();
    }
    let mut context = String::from("\nGround your answer in these research excerpts:\n");
    for snippet in snippets {
        context.push_str("- ");
        // Keep prompts bounded; excerpts beyond this add little
        context.push_str(truncate_chars(&snippet.content, 500));
        context.push('\n');
    }
    context
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
