//! Generation Pipeline
//!
//! Orchestration of the four pipeline stages: blueprint planning, research,
//! glossary, and ranked chunk construction. Each stage executes under its own
//! generation cycle; regeneration supersedes the prior cycle of that stage and
//! cascades to every stage downstream of it.

pub mod blueprint;
pub mod chunks;
pub mod cycle;
pub mod glossary;
pub mod research;

#[cfg(test)]
pub(crate) mod testing;

pub use blueprint::{BlueprintGenerator, GeneratedBlueprint};
pub use chunks::ChunksPhase;
pub use cycle::GenerationCycleManager;
pub use glossary::GlossaryPhase;
pub use research::ResearchPhase;

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use crate::ai::{MetricsSummary, SharedEmbedder, SharedMetrics, SharedProvider, StageMetrics};
use crate::extract::combined_document_text;
use crate::pricing::CostCalculator;
use crate::research::{SharedEncyclopedia, SharedQaApi, SharedSearchApi};
use crate::store::SharedDatabase;
use crate::types::{
    Agent, AgentId, AgentStage, AgentStatus, Blueprint, BlueprintId, BlueprintStatus, CycleType,
    EventId, LoomError, Result,
};

/// Provider handles shared by the pipeline stages.
///
/// The chat provider and embedder are required; the remaining providers are
/// optional and their absence reroutes work (see each phase's strategy).
pub struct PipelineProviders {
    pub llm: SharedProvider,
    pub embedder: SharedEmbedder,
    pub search: Option<SharedSearchApi>,
    pub encyclopedia: Option<SharedEncyclopedia>,
    pub qa: Option<SharedQaApi>,
}

/// Final counts and spend for one pipeline run.
///
/// Counts reflect active rows only; superseded generations are excluded even
/// though their rows remain in the store.
#[derive(Debug)]
pub struct PipelineReport {
    pub event_id: EventId,
    pub agent_id: AgentId,
    pub blueprint_id: BlueprintId,
    pub research_results: usize,
    pub glossary_terms: usize,
    pub context_items: usize,
    pub documents: usize,
    pub metrics: MetricsSummary,
}

/// Orchestrates full generation and per-stage regeneration for one event.
pub struct ContextPipeline {
    db: SharedDatabase,
    providers: PipelineProviders,
    cycles: GenerationCycleManager,
    costs: Arc<CostCalculator>,
    metrics: SharedMetrics,
}

impl ContextPipeline {
    pub fn new(
        db: SharedDatabase,
        providers: PipelineProviders,
        costs: Arc<CostCalculator>,
        metrics: SharedMetrics,
    ) -> Self {
        let cycles = GenerationCycleManager::new(db.clone());
        Self {
            db,
            providers,
            cycles,
            costs,
            metrics,
        }
    }

    /// Run the full pipeline for a new event: blueprint, research, glossary,
    /// then chunks. The generated blueprint is approved automatically; the
    /// regeneration entry points below require that approval.
    pub async fn generate(
        &self,
        topic: &str,
        title: Option<&str>,
        agent_name: &str,
    ) -> Result<PipelineReport> {
        let event = self.db.create_event(topic, None)?;
        let agent = self.db.create_agent(&event.id, agent_name)?;
        self.generate_for(&event.id, &agent.id, title.unwrap_or(topic), topic)
            .await
    }

    /// Run the full pipeline against an existing event and agent
    pub async fn generate_for(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        title: &str,
        topic: &str,
    ) -> Result<PipelineReport> {
        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or_else(|| LoomError::NotFound(format!("agent {agent_id}")))?;
        info!(%event_id, agent = %agent.name, "Starting generation");

        let mut blueprint = self
            .blueprint_stage(event_id, &agent, title, topic)
            .await?;
        self.db
            .update_blueprint_status(&blueprint.id, BlueprintStatus::Approved, None)?;
        blueprint.status = BlueprintStatus::Approved;

        self.run_stages(&blueprint, &agent, CycleType::Research)
            .await?;
        self.report(event_id, agent_id, &blueprint.id)
    }

    /// Re-run research and everything downstream of it
    pub async fn regenerate_research(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
    ) -> Result<PipelineReport> {
        self.regenerate_from(event_id, agent_id, CycleType::Research)
            .await
    }

    /// Re-run the glossary and chunk stages against existing research
    pub async fn regenerate_glossary(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
    ) -> Result<PipelineReport> {
        self.regenerate_from(event_id, agent_id, CycleType::Glossary)
            .await
    }

    /// Re-rank and re-embed the chunk set only
    pub async fn regenerate_chunks(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
    ) -> Result<PipelineReport> {
        self.regenerate_from(event_id, agent_id, CycleType::Chunks)
            .await
    }

    /// Active row counts and run metrics for an event
    pub fn status(&self, event_id: &EventId, agent_id: &AgentId) -> Result<PipelineReport> {
        let blueprint = self
            .db
            .latest_blueprint(event_id, agent_id)?
            .ok_or_else(|| LoomError::NotFound(format!("blueprint for event {event_id}")))?;
        self.report(event_id, agent_id, &blueprint.id)
    }

    async fn regenerate_from(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        start: CycleType,
    ) -> Result<PipelineReport> {
        let blueprint = self
            .db
            .latest_blueprint(event_id, agent_id)?
            .ok_or_else(|| LoomError::NotFound(format!("blueprint for event {event_id}")))?;
        if blueprint.status != BlueprintStatus::Approved {
            return Err(LoomError::BlueprintNotApproved(
                blueprint.status.as_str().to_string(),
            ));
        }
        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or_else(|| LoomError::NotFound(format!("agent {agent_id}")))?;

        info!(%event_id, stage = %start, "Starting regeneration");
        self.run_stages(&blueprint, &agent, start).await?;
        self.report(event_id, agent_id, &blueprint.id)
    }

    // =========================================================================
    // Stage execution
    // =========================================================================

    async fn blueprint_stage(
        &self,
        event_id: &EventId,
        agent: &Agent,
        title: &str,
        topic: &str,
    ) -> Result<Blueprint> {
        self.db
            .update_agent_stage(&agent.id, AgentStatus::Active, AgentStage::Blueprint)?;
        let before = self.metrics.summary();
        let started = std::time::Instant::now();

        // The cycle row references a blueprint, so a shell row is created
        // first and rewritten with the generated content.
        let shell = Blueprint::new(event_id.clone(), agent.id.clone());
        self.db.insert_blueprint(&shell)?;
        self.cycles.supersede_stage(event_id, CycleType::Blueprint)?;
        let cycle = self
            .cycles
            .begin(CycleType::Blueprint, &shell.id, event_id, &agent.id)?;
        self.cycles.start_processing(&cycle.id)?;

        let document_text = combined_document_text(&self.db, event_id)?;
        let generator = BlueprintGenerator::new(
            self.providers.llm.clone(),
            self.costs.clone(),
            self.metrics.clone(),
        );

        match generator
            .generate(event_id, &agent.id, title, topic, document_text.as_deref())
            .await
        {
            Ok(generated) => {
                let mut blueprint = generated.blueprint;
                blueprint.id = shell.id.clone();
                self.db.update_blueprint(&blueprint)?;
                self.db
                    .supersede_blueprints(event_id, &agent.id, &blueprint.id)?;
                self.cycles.attach_metadata(
                    &cycle.id,
                    &json!({
                        "blueprint_cost": generated.cost_usd,
                        "attempts": generated.attempts,
                    }),
                )?;
                self.cycles.complete(&cycle.id)?;
                self.record_stage("blueprint", &before, started);
                Ok(blueprint)
            }
            Err(e) => {
                error!(error = %e, "Blueprint generation failed");
                self.record_cycle_failure(&cycle.id, &e);
                if let Err(db_err) = self.db.update_blueprint_status(
                    &shell.id,
                    BlueprintStatus::Error,
                    Some(&e.to_string()),
                ) {
                    warn!(error = %db_err, "Failed to record blueprint error status");
                }
                self.mark_agent_errored(&agent.id);
                Err(e)
            }
        }
    }

    /// Run `start` and every stage downstream of it. Any stage failure marks
    /// the agent and blueprint errored and propagates; completed upstream
    /// stages keep their results.
    async fn run_stages(
        &self,
        blueprint: &Blueprint,
        agent: &Agent,
        start: CycleType,
    ) -> Result<()> {
        let result = self.run_stages_inner(blueprint, agent, start).await;
        if let Err(e) = &result {
            self.mark_agent_errored(&agent.id);
            if let Err(db_err) = self.db.update_blueprint_status(
                &blueprint.id,
                BlueprintStatus::Error,
                Some(&e.to_string()),
            ) {
                warn!(error = %db_err, "Failed to record blueprint error status");
            }
        }
        result
    }

    async fn run_stages_inner(
        &self,
        blueprint: &Blueprint,
        agent: &Agent,
        start: CycleType,
    ) -> Result<()> {
        if start == CycleType::Research {
            self.research_stage(blueprint, agent).await?;
        }
        if matches!(start, CycleType::Research | CycleType::Glossary) {
            self.glossary_stage(blueprint, agent).await?;
        }
        self.chunks_stage(blueprint, agent).await?;

        self.db.update_agent_stage(
            &agent.id,
            AgentStatus::Idle,
            AgentStage::ContextComplete,
        )?;
        Ok(())
    }

    async fn research_stage(&self, blueprint: &Blueprint, agent: &Agent) -> Result<usize> {
        self.db
            .update_agent_stage(&agent.id, AgentStatus::Active, AgentStage::Researching)?;
        let cycle = self.begin_cycle(blueprint, agent, CycleType::Research)?;

        let phase = ResearchPhase::new(
            self.db.clone(),
            self.providers.llm.clone(),
            self.providers.search.clone(),
            self.providers.encyclopedia.clone(),
            self.cycles.clone(),
            self.costs.clone(),
            self.metrics.clone(),
        );
        let before = self.metrics.summary();
        let started = std::time::Instant::now();
        let count = self.finish_cycle(&cycle.id, phase.run(blueprint, &cycle).await)?;
        self.record_stage("research", &before, started);
        Ok(count)
    }

    async fn glossary_stage(&self, blueprint: &Blueprint, agent: &Agent) -> Result<usize> {
        self.db.update_agent_stage(
            &agent.id,
            AgentStatus::Active,
            AgentStage::BuildingGlossary,
        )?;
        let cycle = self.begin_cycle(blueprint, agent, CycleType::Glossary)?;

        let phase = GlossaryPhase::new(
            self.db.clone(),
            self.providers.llm.clone(),
            self.providers.qa.clone(),
            self.cycles.clone(),
            self.costs.clone(),
            self.metrics.clone(),
        );
        let before = self.metrics.summary();
        let started = std::time::Instant::now();
        let count = self.finish_cycle(&cycle.id, phase.run(blueprint, &cycle).await)?;
        self.record_stage("glossary", &before, started);
        Ok(count)
    }

    async fn chunks_stage(&self, blueprint: &Blueprint, agent: &Agent) -> Result<usize> {
        self.db.update_agent_stage(
            &agent.id,
            AgentStatus::Active,
            AgentStage::BuildingChunks,
        )?;
        let cycle = self.begin_cycle(blueprint, agent, CycleType::Chunks)?;

        let phase = ChunksPhase::new(
            self.db.clone(),
            self.providers.llm.clone(),
            self.providers.embedder.clone(),
            self.cycles.clone(),
            self.costs.clone(),
            self.metrics.clone(),
        );
        let tags = vec![agent.name.clone()];
        let before = self.metrics.summary();
        let started = std::time::Instant::now();
        let count = self.finish_cycle(&cycle.id, phase.run(blueprint, &cycle, &tags).await)?;
        self.record_stage("chunks", &before, started);
        Ok(count)
    }

    /// Supersede the stage's prior cycles, then open a fresh one.
    /// Ordering matters: supersession must never catch the new cycle.
    fn begin_cycle(
        &self,
        blueprint: &Blueprint,
        agent: &Agent,
        cycle_type: CycleType,
    ) -> Result<crate::types::GenerationCycle> {
        self.cycles
            .supersede_stage(&blueprint.event_id, cycle_type)?;
        let cycle = self
            .cycles
            .begin(cycle_type, &blueprint.id, &blueprint.event_id, &agent.id)?;
        self.cycles.start_processing(&cycle.id)?;
        Ok(cycle)
    }

    /// Completion is the stage's done-signal, so a failure to record it is
    /// itself a stage failure.
    fn finish_cycle(
        &self,
        cycle_id: &crate::types::CycleId,
        outcome: Result<usize>,
    ) -> Result<usize> {
        match outcome {
            Ok(count) => {
                self.cycles.complete(cycle_id)?;
                Ok(count)
            }
            Err(e) => {
                self.record_cycle_failure(cycle_id, &e);
                Err(e)
            }
        }
    }

    /// Attribute the calls and spend since `before` to one named stage
    fn record_stage(&self, name: &str, before: &MetricsSummary, started: std::time::Instant) {
        let after = self.metrics.summary();
        self.metrics.complete_stage(StageMetrics {
            name: name.to_string(),
            api_calls: after.api_calls.saturating_sub(before.api_calls),
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd: (after.total_cost_usd - before.total_cost_usd).max(0.0),
        });
    }

    fn record_cycle_failure(&self, cycle_id: &crate::types::CycleId, cause: &LoomError) {
        if let Err(e) = self.cycles.fail(cycle_id, &cause.to_string()) {
            warn!(%cycle_id, error = %e, "Failed to record cycle failure");
        }
    }

    fn mark_agent_errored(&self, agent_id: &AgentId) {
        if let Err(e) =
            self.db
                .update_agent_stage(agent_id, AgentStatus::Error, AgentStage::Error)
        {
            warn!(%agent_id, error = %e, "Failed to record agent error state");
        }
    }

    fn report(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        blueprint_id: &BlueprintId,
    ) -> Result<PipelineReport> {
        let summary = self.db.event_summary(event_id)?;
        Ok(PipelineReport {
            event_id: event_id.clone(),
            agent_id: agent_id.clone(),
            blueprint_id: blueprint_id.clone(),
            research_results: summary.research_results,
            glossary_terms: summary.glossary_terms,
            context_items: summary.context_items,
            documents: summary.documents,
            metrics: self.metrics.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedChat, ScriptedEmbedder};
    use super::*;
    use crate::ai::MetricsCollector;
    use crate::config::PricingConfig;
    use crate::store::Database;
    use crate::types::{CycleStatus, LoomError};

    fn fresh_db() -> SharedDatabase {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        db
    }

    fn pipeline(db: SharedDatabase, chat: ScriptedChat) -> ContextPipeline {
        ContextPipeline::new(
            db,
            PipelineProviders {
                llm: Arc::new(chat),
                embedder: Arc::new(ScriptedEmbedder::new()),
                search: None,
                encyclopedia: None,
                qa: None,
            },
            Arc::new(CostCalculator::new(PricingConfig::default())),
            Arc::new(MetricsCollector::new("test")),
        )
    }

    /// A blueprint response passing every validation rule: 5 queries at
    /// priority 3 (LLM-stub routed when no search provider is configured)
    /// and 10 glossary terms at priority 2 (LLM-defined when Q&A is absent).
    fn valid_blueprint_json(target_count: usize) -> String {
        let details: Vec<String> = (0..5).map(|i| format!("detail {i}")).collect();
        let topics: Vec<String> = (0..5).map(|i| format!("topic {i}")).collect();
        let key_terms: Vec<String> = (0..10).map(|i| format!("term {i}")).collect();
        let queries: Vec<_> = (0..5)
            .map(|i| json!({ "query": format!("query {i}"), "priority": 3, "api": "web_search" }))
            .collect();
        let glossary: Vec<_> = (0..10)
            .map(|i| json!({ "term": format!("glossary {i}"), "priority": 2 }))
            .collect();
        json!({
            "important_details": details,
            "inferred_topics": topics,
            "key_terms": key_terms,
            "research_plan": { "queries": queries },
            "glossary_plan": { "terms": glossary },
            "chunks_plan": {
                "sources": ["web_search", "encyclopedia", "llm"],
                "target_count": target_count,
                "quality_tier": "standard"
            }
        })
        .to_string()
    }

    fn stub_chunks_json() -> String {
        json!(["stub fact one", "stub fact two", "stub fact three"]).to_string()
    }

    fn definition_json(term: &str) -> String {
        json!({ "definition": format!("{term} is a domain term."), "confidence_score": 0.8 })
            .to_string()
    }

    /// Chat script for one full run: blueprint, 5 research stubs, 10
    /// glossary definitions. Chunks need no chat when research covers the
    /// target count.
    fn full_run_script(target_count: usize) -> Vec<String> {
        let mut script = vec![valid_blueprint_json(target_count)];
        script.extend((0..5).map(|_| stub_chunks_json()));
        script.extend((0..10).map(|i| definition_json(&format!("glossary {i}"))));
        script
    }

    #[tokio::test]
    async fn test_generate_runs_all_stages() {
        let db = fresh_db();
        let pipeline = pipeline(db.clone(), ScriptedChat::with_responses(full_run_script(10)));

        let report = pipeline
            .generate("Solar Summit", None, "briefing")
            .await
            .unwrap();

        // 5 stub queries x 3 chunks each
        assert_eq!(report.research_results, 15);
        assert_eq!(report.glossary_terms, 10);
        assert_eq!(report.context_items, 10);

        let agent = db.get_agent(&report.agent_id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.stage, AgentStage::ContextComplete);

        let blueprint = db
            .latest_blueprint(&report.event_id, &report.agent_id)
            .unwrap()
            .unwrap();
        assert_eq!(blueprint.status, BlueprintStatus::Approved);
        assert_eq!(blueprint.id, report.blueprint_id);

        for cycle_type in [
            CycleType::Blueprint,
            CycleType::Research,
            CycleType::Glossary,
            CycleType::Chunks,
        ] {
            let cycle = db
                .active_cycle(&report.event_id, cycle_type)
                .unwrap()
                .unwrap();
            assert_eq!(cycle.status, CycleStatus::Completed, "{cycle_type}");
        }
    }

    #[tokio::test]
    async fn test_regenerate_requires_approved_blueprint() {
        let db = fresh_db();
        let event = db.create_event("Launch", None).unwrap();
        let agent = db.create_agent(&event.id, "briefing").unwrap();
        let mut blueprint = Blueprint::new(event.id.clone(), agent.id.clone());
        blueprint.status = BlueprintStatus::Ready;
        db.insert_blueprint(&blueprint).unwrap();
        db.update_blueprint_status(&blueprint.id, BlueprintStatus::Ready, None)
            .unwrap();

        let pipeline = pipeline(db, ScriptedChat::with_responses(vec![]));
        let err = pipeline
            .regenerate_research(&event.id, &agent.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::BlueprintNotApproved(status) if status == "ready"));
    }

    #[tokio::test]
    async fn test_regenerate_chunks_supersedes_prior_cycle() {
        let db = fresh_db();
        let first = pipeline(db.clone(), ScriptedChat::with_responses(full_run_script(10)));
        let report = first
            .generate("Solar Summit", None, "briefing")
            .await
            .unwrap();

        let old_cycle = db
            .active_cycle(&report.event_id, CycleType::Chunks)
            .unwrap()
            .unwrap();

        // Re-ranking needs no chat: research already covers the target
        let second = pipeline(db.clone(), ScriptedChat::with_responses(vec![]));
        let regen = second
            .regenerate_chunks(&report.event_id, &report.agent_id)
            .await
            .unwrap();

        assert_eq!(regen.context_items, 10);
        assert_eq!(regen.research_results, 15);

        let superseded = db.get_cycle(&old_cycle.id).unwrap().unwrap();
        assert_eq!(superseded.status, CycleStatus::Superseded);
        let current = db
            .active_cycle(&report.event_id, CycleType::Chunks)
            .unwrap()
            .unwrap();
        assert_ne!(current.id, old_cycle.id);
        assert_eq!(current.status, CycleStatus::Completed);

        // Active reads see only the replacement generation
        let items = db.context_items_for_event(&report.event_id).unwrap();
        assert_eq!(items.len(), 10);
    }

    #[tokio::test]
    async fn test_blueprint_failure_marks_agent_and_blueprint() {
        let db = fresh_db();
        let event = db.create_event("Solar Summit", None).unwrap();
        let agent = db.create_agent(&event.id, "briefing").unwrap();
        let pipeline = pipeline(
            db.clone(),
            ScriptedChat::with_script(vec![
                Err(LoomError::LlmApi("provider down".to_string())),
                Err(LoomError::LlmApi("provider down".to_string())),
                Err(LoomError::LlmApi("provider down".to_string())),
            ]),
        );

        let err = pipeline
            .generate_for(&event.id, &agent.id, "Solar Summit", "Solar Summit")
            .await;
        assert!(err.is_err());

        let agent = db.get_agent(&agent.id).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.stage, AgentStage::Error);

        let blueprint = db
            .latest_blueprint(&event.id, &agent.id)
            .unwrap()
            .unwrap();
        assert_eq!(blueprint.status, BlueprintStatus::Error);
        assert!(blueprint
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("provider down"));

        let cycle = db
            .active_cycle(&event.id, CycleType::Blueprint)
            .unwrap()
            .unwrap();
        assert_eq!(cycle.status, CycleStatus::Failed);
    }

    #[tokio::test]
    async fn test_status_for_unknown_event_is_not_found() {
        let db = fresh_db();
        let pipeline = pipeline(db, ScriptedChat::with_responses(vec![]));
        let err = pipeline
            .status(&EventId::new("missing"), &AgentId::new("missing"))
            .unwrap_err();
        assert!(matches!(err, LoomError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_regenerate_glossary_cascades_to_chunks() {
        let db = fresh_db();
        let first = pipeline(db.clone(), ScriptedChat::with_responses(full_run_script(10)));
        let report = first
            .generate("Solar Summit", None, "briefing")
            .await
            .unwrap();

        let old_glossary = db
            .active_cycle(&report.event_id, CycleType::Glossary)
            .unwrap()
            .unwrap();
        let old_chunks = db
            .active_cycle(&report.event_id, CycleType::Chunks)
            .unwrap()
            .unwrap();
        let research = db
            .active_cycle(&report.event_id, CycleType::Research)
            .unwrap()
            .unwrap();

        let script: Vec<String> = (0..10)
            .map(|i| definition_json(&format!("glossary {i}")))
            .collect();
        let second = pipeline(db.clone(), ScriptedChat::with_responses(script));
        let regen = second
            .regenerate_glossary(&report.event_id, &report.agent_id)
            .await
            .unwrap();

        assert_eq!(regen.glossary_terms, 10);
        assert_eq!(regen.context_items, 10);
        // Research is upstream of the regenerated stage and keeps its cycle
        let research_now = db
            .active_cycle(&report.event_id, CycleType::Research)
            .unwrap()
            .unwrap();
        assert_eq!(research_now.id, research.id);
        assert_eq!(
            db.get_cycle(&old_glossary.id).unwrap().unwrap().status,
            CycleStatus::Superseded
        );
        assert_eq!(
            db.get_cycle(&old_chunks.id).unwrap().unwrap().status,
            CycleStatus::Superseded
        );
    }
}
