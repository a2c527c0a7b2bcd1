//! Research Phase
//!
//! Executes the blueprint's query list. Each query routes to one strategy:
//! asynchronous deep research (fire-and-forget, polled afterward), synchronous
//! web search, rate-limited encyclopedia lookup, or an LLM stub when no
//! deep-research provider is configured. Retrieved text is segmented into
//! word-bounded chunks, scored, and persisted under the running cycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ai::{extract_json_from_response, ChatRequest, SharedMetrics, SharedProvider};
use crate::constants::research as tuning;
use crate::pipeline::cycle::GenerationCycleManager;
use crate::pricing::CostCalculator;
use crate::research::{DeepTaskStatus, SharedEncyclopedia, SharedSearchApi};
use crate::store::SharedDatabase;
use crate::types::{
    Blueprint, CycleRef, GenerationCycle, LoomError, ResearchApi, ResearchQuery, ResearchResult,
    ResearchResultMetadata, Result,
};

/// Concrete execution strategy for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResearchStrategy {
    DeepResearch,
    WebSearch,
    Encyclopedia,
    LlmStub,
}

/// Route a query by priority and declared API.
///
/// High-priority queries get the deep-research treatment when a provider is
/// configured; without one they degrade to LLM stub generation rather than
/// being dropped.
pub(crate) fn select_strategy(
    query: &ResearchQuery,
    deep_available: bool,
    search_available: bool,
) -> ResearchStrategy {
    if query.priority <= tuning::DEEP_RESEARCH_MAX_PRIORITY {
        return if deep_available {
            ResearchStrategy::DeepResearch
        } else {
            ResearchStrategy::LlmStub
        };
    }
    match query.api {
        ResearchApi::Encyclopedia => ResearchStrategy::Encyclopedia,
        ResearchApi::Llm => ResearchStrategy::LlmStub,
        ResearchApi::WebSearch | ResearchApi::DeepResearch => {
            if search_available {
                ResearchStrategy::WebSearch
            } else {
                ResearchStrategy::LlmStub
            }
        }
    }
}

/// One submitted deep-research task awaiting completion
struct PendingTask {
    task_id: String,
    query: ResearchQuery,
    submitted: Instant,
}

/// Runs the research stage of one generation cycle.
pub struct ResearchPhase {
    db: SharedDatabase,
    llm: SharedProvider,
    search: Option<SharedSearchApi>,
    encyclopedia: Option<SharedEncyclopedia>,
    cycles: GenerationCycleManager,
    costs: Arc<CostCalculator>,
    metrics: SharedMetrics,
}

impl ResearchPhase {
    pub fn new(
        db: SharedDatabase,
        llm: SharedProvider,
        search: Option<SharedSearchApi>,
        encyclopedia: Option<SharedEncyclopedia>,
        cycles: GenerationCycleManager,
        costs: Arc<CostCalculator>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            db,
            llm,
            search,
            encyclopedia,
            cycles,
            costs,
            metrics,
        }
    }

    /// Execute every planned query and persist the resulting chunks.
    /// Returns the number of research results inserted.
    pub async fn run(&self, blueprint: &Blueprint, cycle: &GenerationCycle) -> Result<usize> {
        let queries = &blueprint.research_plan.queries;
        let total = queries.len();
        info!(cycle_id = %cycle.id, total, "Research phase starting");

        let mut pending: Vec<PendingTask> = Vec::new();
        let mut inserted = 0usize;

        for (index, query) in queries.iter().enumerate() {
            let strategy =
                select_strategy(query, self.search.is_some(), self.search.is_some());
            debug!(query = %query.query, ?strategy, "Dispatching research query");

            match strategy {
                ResearchStrategy::DeepResearch => match self.submit_deep(query).await {
                    Ok(task_id) => pending.push(PendingTask {
                        task_id,
                        query: query.clone(),
                        submitted: Instant::now(),
                    }),
                    Err(e) => {
                        warn!(query = %query.query, error = %e, "Deep-research submission failed, using sync search");
                        inserted += self
                            .search_and_insert(blueprint, cycle, query, "search_fallback")
                            .await;
                    }
                },
                ResearchStrategy::WebSearch => {
                    inserted += self
                        .search_and_insert(blueprint, cycle, query, "web_search")
                        .await;
                }
                ResearchStrategy::Encyclopedia => {
                    inserted += self.encyclopedia_and_insert(blueprint, cycle, query).await;
                }
                ResearchStrategy::LlmStub => {
                    inserted += self.stub_and_insert(blueprint, cycle, query).await;
                }
            }

            self.cycles.set_progress(&cycle.id, index + 1, total)?;
        }

        inserted += self.poll_pending(blueprint, cycle, pending).await?;
        info!(cycle_id = %cycle.id, inserted, "Research phase finished");
        Ok(inserted)
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    async fn submit_deep(&self, query: &ResearchQuery) -> Result<String> {
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| LoomError::Config("deep research requires a search provider".into()))?;

        let instructions = format!(
            "Research the following question thoroughly and report your findings.\n\
             Question: {}",
            query.query
        );
        let task_id = search
            .start_research(&instructions, &deep_output_schema())
            .await?;
        self.metrics
            .record_flat_cost(self.costs.deep_research_cost(1));
        info!(query = %query.query, %task_id, "Deep-research task submitted");
        Ok(task_id)
    }

    /// Sync search; provider errors yield zero chunks for this query
    async fn search_and_insert(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        query: &ResearchQuery,
        provenance: &str,
    ) -> usize {
        let Some(search) = self.search.as_ref() else {
            warn!(query = %query.query, "No search provider configured, skipping query");
            return 0;
        };

        let hits = match search.search(&query.query, tuning::SEARCH_RESULT_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query = %query.query, error = %e, "Search failed, skipping query");
                return 0;
            }
        };
        self.metrics.record_flat_cost(self.costs.search_cost(1));

        let mut results = Vec::new();
        for hit in &hits {
            let rich_signal = hit.author.is_some() || hit.published_date.is_some();
            for (chunk_index, chunk) in segment_text(&hit.text).into_iter().enumerate() {
                let word_count = chunk.split_whitespace().count();
                let mut result = ResearchResult::new(
                    blueprint.id.clone(),
                    CycleRef::from(cycle.id.clone()),
                    chunk,
                    query.query.clone(),
                    ResearchApi::WebSearch,
                );
                result.source_url = Some(hit.url.clone());
                result.quality_score = quality_score(hit.title.as_deref(), rich_signal, word_count);
                result.metadata = ResearchResultMetadata {
                    title: hit.title.clone(),
                    author: hit.author.clone(),
                    published_date: hit.published_date.clone(),
                    priority: query.priority,
                    agent_utility: query.agent_utility.clone(),
                    chunk_index,
                    provenance: Some(provenance.to_string()),
                };
                results.push(result);
            }
        }
        self.insert_results(results)
    }

    async fn encyclopedia_and_insert(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        query: &ResearchQuery,
    ) -> usize {
        let Some(encyclopedia) = self.encyclopedia.as_ref() else {
            return self
                .search_and_insert(blueprint, cycle, query, "search_fallback")
                .await;
        };

        let article = match encyclopedia.lookup(&query.query).await {
            Ok(Some(article)) => article,
            Ok(None) => {
                debug!(query = %query.query, "No encyclopedia article found");
                return 0;
            }
            Err(e) => {
                warn!(query = %query.query, error = %e, "Encyclopedia lookup failed, skipping query");
                return 0;
            }
        };

        let mut results = Vec::new();
        for (chunk_index, chunk) in segment_text(&article.extract).into_iter().enumerate() {
            let word_count = chunk.split_whitespace().count();
            let mut result = ResearchResult::new(
                blueprint.id.clone(),
                CycleRef::from(cycle.id.clone()),
                chunk,
                query.query.clone(),
                ResearchApi::Encyclopedia,
            );
            result.source_url = Some(article.url.clone());
            result.quality_score = quality_score(Some(&article.title), false, word_count);
            result.metadata = ResearchResultMetadata {
                title: Some(article.title.clone()),
                priority: query.priority,
                agent_utility: query.agent_utility.clone(),
                chunk_index,
                provenance: Some("encyclopedia".to_string()),
                ..ResearchResultMetadata::default()
            };
            results.push(result);
        }
        self.insert_results(results)
    }

    /// Fabricate a few chunks from the LLM's general knowledge
    async fn stub_and_insert(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        query: &ResearchQuery,
    ) -> usize {
        let prompt = format!(
            "Write {count} short factual context passages (2-4 sentences each) about:\n{query}\n\n\
             Respond with a JSON array of {count} strings.",
            count = tuning::STUB_CHUNK_COUNT,
            query = query.query,
        );
        let request = ChatRequest::json(prompt);

        let response = match self.llm.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(query = %query.query, error = %e, "Stub generation failed, skipping query");
                return 0;
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
        if passages.is_empty() {
            warn!(query = %query.query, "Stub generation returned no usable passages");
            return 0;
        }

        let results = passages
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(chunk_index, passage)| {
                let mut result = ResearchResult::new(
                    blueprint.id.clone(),
                    CycleRef::from(cycle.id.clone()),
                    passage,
                    query.query.clone(),
                    ResearchApi::Llm,
                );
                result.quality_score = tuning::QUALITY_BASE;
                result.metadata = ResearchResultMetadata {
                    priority: query.priority,
                    agent_utility: query.agent_utility.clone(),
                    chunk_index,
                    provenance: Some("llm_stub".to_string()),
                    ..ResearchResultMetadata::default()
                };
                result
            })
            .collect();
        self.insert_results(results)
    }

    // =========================================================================
    // Background polling
    // =========================================================================

    /// Poll submitted deep-research tasks to completion.
    ///
    /// Tasks that time out or fail degrade to a synchronous search for the
    /// same query, so no query silently yields zero results. A provider
    /// schema rejection is fatal and propagates.
    async fn poll_pending(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        mut pending: Vec<PendingTask>,
    ) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let search = self
            .search
            .as_ref()
            .ok_or_else(|| LoomError::Config("deep research requires a search provider".into()))?;
        let timeout = Duration::from_secs(tuning::POLL_TIMEOUT_SECS);
        let mut inserted = 0usize;

        while !pending.is_empty() {
            tokio::time::sleep(Duration::from_secs(tuning::POLL_INTERVAL_SECS)).await;

            let mut still_pending = Vec::new();
            for task in pending {
                match search.poll_research(&task.task_id).await {
                    Ok(DeepTaskStatus::Running) => {
                        if task.submitted.elapsed() >= timeout {
                            warn!(task_id = %task.task_id, "Deep-research task timed out, using sync search");
                            inserted += self
                                .search_and_insert(blueprint, cycle, &task.query, "search_fallback")
                                .await;
                        } else {
                            debug!(task_id = %task.task_id, "Deep-research task still running");
                            still_pending.push(task);
                        }
                    }
                    Ok(DeepTaskStatus::Completed(raw)) => {
                        let text = normalize_deep_output(&raw);
                        inserted += self.insert_deep_results(blueprint, cycle, &task, &text);
                    }
                    Ok(DeepTaskStatus::Failed(message)) => {
                        warn!(task_id = %task.task_id, %message, "Deep-research task failed, using sync search");
                        inserted += self
                            .search_and_insert(blueprint, cycle, &task.query, "search_fallback")
                            .await;
                    }
                    Err(e @ LoomError::SchemaRejected { .. }) => return Err(e),
                    Err(e) => {
                        warn!(task_id = %task.task_id, error = %e, "Poll failed");
                        if task.submitted.elapsed() >= timeout {
                            inserted += self
                                .search_and_insert(blueprint, cycle, &task.query, "search_fallback")
                                .await;
                        } else {
                            still_pending.push(task);
                        }
                    }
                }
            }
            pending = still_pending;
            self.cycles
                .attach_metadata(&cycle.id, &json!({ "pending_tasks": pending.len() }))?;
        }

        Ok(inserted)
    }

    fn insert_deep_results(
        &self,
        blueprint: &Blueprint,
        cycle: &GenerationCycle,
        task: &PendingTask,
        text: &str,
    ) -> usize {
        let results = segment_text(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let word_count = chunk.split_whitespace().count();
                let mut result = ResearchResult::new(
                    blueprint.id.clone(),
                    CycleRef::from(cycle.id.clone()),
                    chunk,
                    task.query.query.clone(),
                    ResearchApi::DeepResearch,
                );
                // Deep-research output has no retrieval metadata; score on
                // length alone
                result.quality_score = quality_score(None, false, word_count);
                result.metadata = ResearchResultMetadata {
                    priority: task.query.priority,
                    agent_utility: task.query.agent_utility.clone(),
                    chunk_index,
                    provenance: Some("deep_research".to_string()),
                    ..ResearchResultMetadata::default()
                };
                result
            })
            .collect();
        self.insert_results(results)
    }

    /// Insert a batch; per-item failures are logged and skipped
    fn insert_results(&self, results: Vec<ResearchResult>) -> usize {
        let mut inserted = 0;
        for result in results {
            match self.db.insert_research_result(&result) {
                Ok(()) => inserted += 1,
                Err(e) => warn!(id = %result.id, error = %e, "Failed to insert research result"),
            }
        }
        inserted
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Output shape requested from the deep-research provider
fn deep_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "key_points": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["summary"]
    })
}

/// Flatten string-or-structured deep-research output into plain text
pub(crate) fn normalize_deep_output(raw: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        let mut text = map
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if let Some(Value::Array(points)) = map.get("key_points") {
            for point in points {
                if let Some(s) = point.as_str() {
                    text.push_str("\n- ");
                    text.push_str(s);
                }
            }
        }
        if !text.trim().is_empty() {
            return text;
        }
    }
    raw.to_string()
}

/// Split text into word-bounded chunks.
///
/// Chunk sizes are evened out so that no chunk exceeds the maximum and, for
/// multi-chunk output, none falls below the minimum.
pub(crate) fn segment_text(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let chunk_count = words.len().div_ceil(tuning::CHUNK_MAX_WORDS);
    let chunk_size = words.len().div_ceil(chunk_count);
    words
        .chunks(chunk_size)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Heuristic quality score in [0, 1]
pub(crate) fn quality_score(title: Option<&str>, rich_signal: bool, word_count: usize) -> f64 {
    let mut score = tuning::QUALITY_BASE;
    if title.is_some_and(|t| t.len() > tuning::QUALITY_TITLE_THRESHOLD) {
        score += tuning::QUALITY_SIGNAL_BONUS;
    }
    if rich_signal {
        score += tuning::QUALITY_SIGNAL_BONUS;
    }
    if word_count >= tuning::QUALITY_WORD_THRESHOLD {
        score += tuning::QUALITY_SIGNAL_BONUS;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MetricsCollector;
    use crate::config::PricingConfig;
    use crate::pipeline::testing::{ScriptedChat, ScriptedEncyclopedia, ScriptedSearch};
    use crate::store::Database;
    use crate::types::CycleType;
    use proptest::prelude::*;

    fn query(priority: u8, api: ResearchApi) -> ResearchQuery {
        ResearchQuery {
            query: "festival lineup history".to_string(),
            priority,
            api,
            rationale: None,
            agent_utility: vec!["scheduler".to_string()],
        }
    }

    struct Fixture {
        db: SharedDatabase,
        blueprint: Blueprint,
        cycle: GenerationCycle,
    }

    fn fixture(queries: Vec<ResearchQuery>) -> Fixture {
        let db: SharedDatabase = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let event = db.create_event("WOMAD", None).unwrap();
        let agent = db.create_agent(&event.id, "scheduler").unwrap();
        let mut blueprint = Blueprint::new(event.id.clone(), agent.id.clone());
        blueprint.research_plan.queries = queries;
        db.insert_blueprint(&blueprint).unwrap();
        let cycle = GenerationCycle::new(
            CycleType::Research,
            blueprint.id.clone(),
            event.id,
            agent.id,
        );
        db.insert_cycle(&cycle).unwrap();
        Fixture {
            db,
            blueprint,
            cycle,
        }
    }

    fn phase(
        fixture: &Fixture,
        chat: ScriptedChat,
        search: Option<Arc<ScriptedSearch>>,
    ) -> ResearchPhase {
        ResearchPhase::new(
            fixture.db.clone(),
            Arc::new(chat),
            search.map(|s| s as SharedSearchApi),
            None,
            GenerationCycleManager::new(fixture.db.clone()),
            Arc::new(CostCalculator::new(PricingConfig::default())),
            Arc::new(MetricsCollector::new("test")),
        )
    }

    fn phase_with_encyclopedia(
        fixture: &Fixture,
        encyclopedia: Arc<ScriptedEncyclopedia>,
    ) -> ResearchPhase {
        ResearchPhase::new(
            fixture.db.clone(),
            Arc::new(ScriptedChat::with_responses(vec![])),
            None,
            Some(encyclopedia as SharedEncyclopedia),
            GenerationCycleManager::new(fixture.db.clone()),
            Arc::new(CostCalculator::new(PricingConfig::default())),
            Arc::new(MetricsCollector::new("test")),
        )
    }

    fn long_text(words: usize) -> String {
        vec!["word"; words].join(" ")
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            select_strategy(&query(1, ResearchApi::DeepResearch), true, true),
            ResearchStrategy::DeepResearch
        );
        assert_eq!(
            select_strategy(&query(2, ResearchApi::WebSearch), true, true),
            ResearchStrategy::DeepResearch
        );
        assert_eq!(
            select_strategy(&query(1, ResearchApi::DeepResearch), false, false),
            ResearchStrategy::LlmStub
        );
        assert_eq!(
            select_strategy(&query(3, ResearchApi::WebSearch), true, true),
            ResearchStrategy::WebSearch
        );
        assert_eq!(
            select_strategy(&query(4, ResearchApi::Encyclopedia), true, true),
            ResearchStrategy::Encyclopedia
        );
        assert_eq!(
            select_strategy(&query(3, ResearchApi::Llm), true, true),
            ResearchStrategy::LlmStub
        );
        assert_eq!(
            select_strategy(&query(3, ResearchApi::WebSearch), false, false),
            ResearchStrategy::LlmStub
        );
    }

    #[test]
    fn test_segment_text_bounds() {
        let chunks = segment_text(&long_text(1000));
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            let count = chunk.split_whitespace().count();
            assert!((tuning::CHUNK_MIN_WORDS..=tuning::CHUNK_MAX_WORDS).contains(&count));
        }
        let total: usize = chunks.iter().map(|c| c.split_whitespace().count()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_segment_short_text_single_chunk() {
        let chunks = segment_text(&long_text(50));
        assert_eq!(chunks.len(), 1);
        assert!(segment_text("").is_empty());
    }

    #[test]
    fn test_normalize_deep_output() {
        let structured = r#"{"summary": "An overview.", "key_points": ["first", "second"]}"#;
        assert_eq!(
            normalize_deep_output(structured),
            "An overview.\n- first\n- second"
        );
        assert_eq!(normalize_deep_output("plain report"), "plain report");
    }

    #[tokio::test]
    async fn test_sync_search_inserts_scored_chunks() {
        let fixture = fixture(vec![query(3, ResearchApi::WebSearch)]);
        let search = Arc::new(ScriptedSearch::new(vec![ScriptedSearch::hit(
            "A reasonably long article title",
            &long_text(250),
        )]));
        let phase = phase(&fixture, ScriptedChat::with_responses(vec![]), Some(search));

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert_eq!(inserted, 1);

        let results = fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.api, ResearchApi::WebSearch);
        // Title, rich metadata, and length all fire: 0.5 + 3 * 0.1
        assert!((result.quality_score - 0.8).abs() < 1e-9);
        assert_eq!(result.metadata.agent_utility, vec!["scheduler"]);

        let cycle = fixture.db.get_cycle(&fixture.cycle.id).unwrap().unwrap();
        assert_eq!(cycle.progress_current, Some(1));
        assert_eq!(cycle.progress_total, Some(1));
    }

    #[tokio::test]
    async fn test_high_priority_without_provider_uses_llm_stub() {
        let fixture = fixture(vec![query(1, ResearchApi::DeepResearch)]);
        let chat = ScriptedChat::with_responses(vec![
            r#"["passage one", "passage two", "passage three"]"#.to_string(),
        ]);
        let phase = phase(&fixture, chat, None);

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert_eq!(inserted, 3);

        let results = fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap();
        assert!(results.iter().all(|r| r.api == ResearchApi::Llm));
        assert!(results
            .iter()
            .all(|r| r.metadata.provenance.as_deref() == Some("llm_stub")));
    }

    #[tokio::test]
    async fn test_malformed_stub_output_yields_zero_chunks() {
        let fixture = fixture(vec![query(3, ResearchApi::Llm)]);
        let chat = ScriptedChat::with_responses(vec!["not json at all".to_string()]);
        let phase = phase(&fixture, chat, None);

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn test_encyclopedia_article_segmented_and_inserted() {
        let fixture = fixture(vec![query(4, ResearchApi::Encyclopedia)]);
        let encyclopedia = Arc::new(ScriptedEncyclopedia::new(Some(
            ScriptedEncyclopedia::article("World music festival circuit", &long_text(500)),
        )));
        let lookups = encyclopedia.lookups.clone();
        let phase = phase_with_encyclopedia(&fixture, encyclopedia);

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        // 500 words split into two even chunks
        assert_eq!(inserted, 2);
        assert_eq!(
            lookups.lock().unwrap().as_slice(),
            ["festival lineup history"]
        );

        let results = fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.api, ResearchApi::Encyclopedia);
            assert_eq!(result.metadata.provenance.as_deref(), Some("encyclopedia"));
            assert_eq!(
                result.source_url.as_deref(),
                Some("https://en.wikipedia.org/wiki/World_music_festival_circuit")
            );
            // Title and length signals fire: 0.5 + 2 * 0.1
            assert!((result.quality_score - 0.7).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_encyclopedia_lookup_failure_skips_query() {
        let fixture = fixture(vec![query(4, ResearchApi::Encyclopedia)]);
        let encyclopedia = Arc::new(ScriptedEncyclopedia::failing());
        let phase = phase_with_encyclopedia(&fixture, encyclopedia);

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert_eq!(inserted, 0);
        assert!(fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_task_completion_persists_normalized_output() {
        let fixture = fixture(vec![query(1, ResearchApi::DeepResearch)]);
        let report = serde_json::json!({
            "summary": long_text(220),
            "key_points": ["point one", "point two"]
        })
        .to_string();
        let search = Arc::new(
            ScriptedSearch::new(vec![]).with_polls(vec![Ok(DeepTaskStatus::Completed(report))]),
        );
        let started = search.started.clone();
        let phase = phase(&fixture, ScriptedChat::with_responses(vec![]), Some(search));

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert!(inserted >= 1);
        assert_eq!(started.lock().unwrap().len(), 1);

        let results = fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap();
        assert!(results.iter().all(|r| r.api == ResearchApi::DeepResearch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_falls_back_to_sync_search() {
        let fixture = fixture(vec![query(1, ResearchApi::DeepResearch)]);
        // Polls default to Running forever; the task must age out
        let search = Arc::new(ScriptedSearch::new(vec![ScriptedSearch::hit(
            "Fallback article with a long title",
            &long_text(300),
        )]));
        let searches = search.searches.clone();
        let phase = phase(&fixture, ScriptedChat::with_responses(vec![]), Some(search));

        let inserted = phase.run(&fixture.blueprint, &fixture.cycle).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(searches.lock().unwrap().len(), 1);

        let results = fixture
            .db
            .research_for_blueprint(&fixture.blueprint.id)
            .unwrap();
        assert_eq!(
            results[0].metadata.provenance.as_deref(),
            Some("search_fallback")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_rejection_is_fatal() {
        let fixture = fixture(vec![query(1, ResearchApi::DeepResearch)]);
        let search = Arc::new(ScriptedSearch::new(vec![]).with_polls(vec![Err(
            LoomError::SchemaRejected {
                task_id: "task-0".to_string(),
                message: "output schema invalid".to_string(),
            },
        )]));
        let phase = phase(&fixture, ScriptedChat::with_responses(vec![]), Some(search));

        let result = phase.run(&fixture.blueprint, &fixture.cycle).await;
        assert!(matches!(result, Err(LoomError::SchemaRejected { .. })));
    }

    proptest! {
        #[test]
        fn prop_quality_score_in_bounds(
            title_len in 0usize..200,
            rich in any::<bool>(),
            words in 0usize..100_000,
        ) {
            let title = "t".repeat(title_len);
            let score = quality_score(Some(&title), rich, words);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
