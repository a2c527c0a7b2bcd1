//! Context Chunk Data Model
//!
//! Chunks are the ranked, embedded units of context text consumed by
//! downstream agents. Rank is a dense 1-based ordering assigned strictly by
//! descending composite score within a cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CycleRef, EventId};

/// Where a candidate chunk came from, in descending ranking priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    WebSearch,
    DeepResearch,
    Encyclopedia,
    LlmFiller,
}

impl ChunkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::DeepResearch => "deep_research",
            Self::Encyclopedia => "encyclopedia",
            Self::LlmFiller => "llm_filler",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deep_research" => Self::DeepResearch,
            "encyclopedia" => Self::Encyclopedia,
            "llm_filler" => Self::LlmFiller,
            _ => Self::WebSearch,
        }
    }

    /// Ranking priority component in [0, 1]; external retrieval outranks
    /// encyclopedia, which outranks LLM filler
    pub fn priority_score(&self) -> f64 {
        match self {
            Self::WebSearch | Self::DeepResearch => 1.0,
            Self::Encyclopedia => 0.7,
            Self::LlmFiller => 0.4,
        }
    }
}

/// Per-chunk provenance and scoring metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub research_source: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub composite_score: f64,
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default)]
    pub agent_utility: Vec<String>,
    #[serde(default)]
    pub query_priority: u8,
}

/// One ranked, embedded context chunk
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub id: String,
    pub event_id: EventId,
    pub cycle: CycleRef,
    pub chunk: String,
    /// Fixed-length embedding vector; empty until the embed step runs
    pub embedding: Vec<f32>,
    /// 1-based dense rank within the cycle
    pub rank: usize,
    pub source: ChunkSource,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(
        event_id: EventId,
        cycle: CycleRef,
        chunk: impl Into<String>,
        source: ChunkSource,
    ) -> Self {
        let chunk = chunk.into();
        let chunk_size = chunk.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id,
            cycle,
            chunk,
            embedding: Vec::new(),
            rank: 0,
            source,
            metadata: ChunkMetadata {
                chunk_size,
                ..ChunkMetadata::default()
            },
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_priority_ordering() {
        assert!(ChunkSource::WebSearch.priority_score() > ChunkSource::Encyclopedia.priority_score());
        assert!(
            ChunkSource::Encyclopedia.priority_score() > ChunkSource::LlmFiller.priority_score()
        );
    }

    #[test]
    fn test_source_parse_roundtrip() {
        for source in [
            ChunkSource::WebSearch,
            ChunkSource::DeepResearch,
            ChunkSource::Encyclopedia,
            ChunkSource::LlmFiller,
        ] {
            assert_eq!(ChunkSource::parse(source.as_str()), source);
        }
    }

    #[test]
    fn test_new_item_records_chunk_size() {
        let item = ContextItem::new(
            EventId::new("evt"),
            CycleRef::Legacy,
            "hello world",
            ChunkSource::WebSearch,
        );
        assert_eq!(item.metadata.chunk_size, 11);
        assert_eq!(item.rank, 0);
        assert!(item.embedding.is_empty());
    }
}
