//! Blueprint Data Model
//!
//! The blueprint is the validated plan produced before any research, glossary,
//! or chunk work begins. It is parsed directly from LLM JSON output, so every
//! collection field tolerates absence and is repaired by the normalizer in
//! `pipeline::blueprint` when below its minimum cardinality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::research::ResearchQuery;
use super::{AgentId, BlueprintId, EventId};

// =============================================================================
// Status
// =============================================================================

/// Blueprint lifecycle status.
///
/// `generating → ready → approved`, with `error` on irrecoverable generation
/// failure and `superseded` when a newer blueprint replaces this one for the
/// same agent. At most one non-superseded blueprint exists per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintStatus {
    Generating,
    Ready,
    Approved,
    Superseded,
    Error,
}

impl BlueprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Approved => "approved",
            Self::Superseded => "superseded",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "generating" => Self::Generating,
            "ready" => Self::Ready,
            "approved" => Self::Approved,
            "superseded" => Self::Superseded,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for BlueprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Quality tier for the chunk set, with target-count consistency rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Basic,
    #[default]
    Standard,
    Comprehensive,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Comprehensive => "comprehensive",
        }
    }
}

/// Research stage plan: queries to execute plus cost estimate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    #[serde(default)]
    pub queries: Vec<ResearchQuery>,
    #[serde(default)]
    pub total_searches: usize,
    #[serde(default)]
    pub estimated_total_cost: f64,
}

/// One planned glossary term with its priority band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryTermPlan {
    pub term: String,
    /// 1 = highest; the top band qualifies for the authoritative Q&A path
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_priority() -> u8 {
    2
}

/// Glossary stage plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlossaryPlan {
    #[serde(default)]
    pub terms: Vec<GlossaryTermPlan>,
    #[serde(default)]
    pub estimated_count: usize,
}

/// Chunks stage plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunksPlan {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub target_count: usize,
    #[serde(default)]
    pub quality_tier: QualityTier,
    #[serde(default)]
    pub ranking_strategy: Option<String>,
}

// =============================================================================
// Cost Breakdown
// =============================================================================

/// Estimated or accrued USD cost per stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    #[serde(default)]
    pub research: f64,
    #[serde(default)]
    pub glossary: f64,
    #[serde(default)]
    pub chunks: f64,
    #[serde(default)]
    pub total: f64,
}

impl CostBreakdown {
    /// Recompute `total` from the stage components
    pub fn with_total(mut self) -> Self {
        self.total = self.research + self.glossary + self.chunks;
        self
    }

    /// Accumulate another breakdown into this one
    pub fn add(&mut self, other: &CostBreakdown) {
        self.research += other.research;
        self.glossary += other.glossary;
        self.chunks += other.chunks;
        self.total = self.research + self.glossary + self.chunks;
    }
}

// =============================================================================
// Blueprint
// =============================================================================

/// The validated plan record for one event+agent pair.
///
/// Invariant: once validated, every required array meets its minimum
/// cardinality (see `constants::blueprint`); the normalizer guarantees at
/// least one unit of work per downstream phase even when validation fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(skip, default = "BlueprintId::generate")]
    pub id: BlueprintId,
    #[serde(skip, default = "EventId::generate")]
    pub event_id: EventId,
    #[serde(skip, default = "AgentId::generate")]
    pub agent_id: AgentId,
    #[serde(skip)]
    pub status: BlueprintStatus,

    #[serde(default)]
    pub important_details: Vec<String>,
    #[serde(default)]
    pub inferred_topics: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub research_plan: ResearchPlan,
    #[serde(default)]
    pub glossary_plan: GlossaryPlan,
    #[serde(default)]
    pub chunks_plan: ChunksPlan,
    #[serde(default)]
    pub cost_breakdown: CostBreakdown,

    #[serde(skip)]
    pub error_message: Option<String>,
    #[serde(skip, default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip, default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for BlueprintStatus {
    fn default() -> Self {
        Self::Generating
    }
}

impl Blueprint {
    /// Create an empty blueprint shell in `generating` status
    pub fn new(event_id: EventId, agent_id: AgentId) -> Self {
        Self {
            id: BlueprintId::generate(),
            event_id,
            agent_id,
            status: BlueprintStatus::Generating,
            important_details: Vec::new(),
            inferred_topics: Vec::new(),
            key_terms: Vec::new(),
            research_plan: ResearchPlan::default(),
            glossary_plan: GlossaryPlan::default(),
            chunks_plan: ChunksPlan::default(),
            cost_breakdown: CostBreakdown::default(),
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Adopt the plan content parsed from LLM output, keeping identity fields
    pub fn with_content(mut self, parsed: Blueprint) -> Self {
        self.important_details = parsed.important_details;
        self.inferred_topics = parsed.inferred_topics;
        self.key_terms = parsed.key_terms;
        self.research_plan = parsed.research_plan;
        self.glossary_plan = parsed.glossary_plan;
        self.chunks_plan = parsed.chunks_plan;
        self.cost_breakdown = parsed.cost_breakdown.with_total();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            BlueprintStatus::Generating,
            BlueprintStatus::Ready,
            BlueprintStatus::Approved,
            BlueprintStatus::Superseded,
            BlueprintStatus::Error,
        ] {
            assert_eq!(BlueprintStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            BlueprintStatus::parse("garbage"),
            BlueprintStatus::Error
        );
    }

    #[test]
    fn test_cost_breakdown_total() {
        let cost = CostBreakdown {
            research: 1.5,
            glossary: 0.5,
            chunks: 1.0,
            total: 0.0,
        }
        .with_total();
        assert!((cost.total - 3.0).abs() < f64::EPSILON);

        let mut accumulated = CostBreakdown::default();
        accumulated.add(&cost);
        accumulated.add(&cost);
        assert!((accumulated.total - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_parses_partial_llm_output() {
        // Missing arrays deserialize as empty, never as an error
        let parsed: Blueprint = serde_json::from_str(
            r#"{"important_details": ["a"], "chunks_plan": {"target_count": 100}}"#,
        )
        .expect("partial blueprint should parse");
        assert_eq!(parsed.important_details, vec!["a"]);
        assert!(parsed.inferred_topics.is_empty());
        assert_eq!(parsed.chunks_plan.target_count, 100);
        assert_eq!(parsed.chunks_plan.quality_tier, QualityTier::Standard);
    }
}
