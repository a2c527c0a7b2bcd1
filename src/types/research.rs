//! Research Data Model
//!
//! Queries come from the blueprint's research plan; results are the retrieved
//! or generated text fragments persisted per generation cycle.

use serde::{Deserialize, Serialize};

use super::{BlueprintId, CycleRef};

/// Provider hint declared by the blueprint for a query.
///
/// The LLM emits this as a string discriminator; routing combines it with
/// query priority to pick a concrete strategy (see `pipeline::research`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchApi {
    /// Synchronous web search
    #[default]
    #[serde(alias = "search", alias = "exa", alias = "exa_search")]
    WebSearch,
    /// Asynchronous deep-research task
    #[serde(alias = "deep", alias = "exa_research")]
    DeepResearch,
    /// Rate-limited encyclopedia lookup
    #[serde(alias = "wikipedia", alias = "wiki")]
    Encyclopedia,
    /// LLM general-knowledge generation
    #[serde(alias = "openai", alias = "chat")]
    Llm,
}

impl ResearchApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::DeepResearch => "deep_research",
            Self::Encyclopedia => "encyclopedia",
            Self::Llm => "llm",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deep_research" => Self::DeepResearch,
            "encyclopedia" => Self::Encyclopedia,
            "llm" => Self::Llm,
            _ => Self::WebSearch,
        }
    }
}

impl std::fmt::Display for ResearchApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One planned research query from the blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub query: String,
    /// 1 = highest; priority <= 2 routes to deep research when available
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub api: ResearchApi,
    #[serde(default)]
    pub rationale: Option<String>,
    /// Consuming-agent tags this query is expected to serve
    #[serde(default)]
    pub agent_utility: Vec<String>,
}

fn default_priority() -> u8 {
    3
}

/// Provenance and scoring metadata carried by each research result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchResultMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    /// Originating query priority, used by chunk ranking
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub agent_utility: Vec<String>,
    /// Index of this fragment within its source document
    #[serde(default)]
    pub chunk_index: usize,
    /// Human-readable provenance ("deep_research", "search_fallback", ...)
    #[serde(default)]
    pub provenance: Option<String>,
}

/// One retrieved or generated text fragment
#[derive(Debug, Clone)]
pub struct ResearchResult {
    pub id: String,
    pub blueprint_id: BlueprintId,
    pub cycle: CycleRef,
    pub content: String,
    pub query: String,
    pub api: ResearchApi,
    pub source_url: Option<String>,
    /// Heuristic score in [0, 1]
    pub quality_score: f64,
    pub metadata: ResearchResultMetadata,
}

impl ResearchResult {
    pub fn new(
        blueprint_id: BlueprintId,
        cycle: CycleRef,
        content: impl Into<String>,
        query: impl Into<String>,
        api: ResearchApi,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            blueprint_id,
            cycle,
            content: content.into(),
            query: query.into(),
            api,
            source_url: None,
            quality_score: 0.5,
            metadata: ResearchResultMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_aliases_from_llm_output() {
        let q: ResearchQuery =
            serde_json::from_str(r#"{"query": "history of jazz", "api": "wikipedia"}"#).unwrap();
        assert_eq!(q.api, ResearchApi::Encyclopedia);
        assert_eq!(q.priority, 3);

        let q: ResearchQuery =
            serde_json::from_str(r#"{"query": "x", "api": "exa", "priority": 1}"#).unwrap();
        assert_eq!(q.api, ResearchApi::WebSearch);
        assert_eq!(q.priority, 1);
    }

    #[test]
    fn test_api_parse_roundtrip() {
        for api in [
            ResearchApi::WebSearch,
            ResearchApi::DeepResearch,
            ResearchApi::Encyclopedia,
            ResearchApi::Llm,
        ] {
            assert_eq!(ResearchApi::parse(api.as_str()), api);
        }
        // Unknown strings degrade to web search rather than failing
        assert_eq!(ResearchApi::parse("unknown"), ResearchApi::WebSearch);
    }
}
