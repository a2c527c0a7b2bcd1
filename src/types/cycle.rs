//! Generation Cycle Data Model
//!
//! One cycle row records one execution of a pipeline stage. Cycles are never
//! deleted; supersession flips their status, and that status is the sole
//! authority on whether dependent rows are still current.
//!
//! ## State Machine
//!
//! ```text
//! started --> processing --> completed
//!    |             |    \--> failed
//!    |             |
//!    +------+------+--[later regeneration]--> superseded
//!           |
//!       completed ----------[later regeneration]--> superseded
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AgentId, BlueprintId, CycleId, EventId};

/// Pipeline stage a cycle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    Blueprint,
    Research,
    Glossary,
    Chunks,
}

impl CycleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blueprint => "blueprint",
            Self::Research => "research",
            Self::Glossary => "glossary",
            Self::Chunks => "chunks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blueprint" => Some(Self::Blueprint),
            "research" => Some(Self::Research),
            "glossary" => Some(Self::Glossary),
            "chunks" => Some(Self::Chunks),
            _ => None,
        }
    }
}

impl std::fmt::Display for CycleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cycle execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Started,
    Processing,
    Completed,
    Failed,
    Superseded,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    /// Terminal states admit no further work transitions
    /// (superseded may still be applied externally)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Superseded)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One versioned execution record of a pipeline stage.
///
/// Invariants: `progress_current <= progress_total` once both are set;
/// `completed_at` is set exactly when status transitions to `completed`;
/// `metadata` updates are merged, not overwritten.
#[derive(Debug, Clone)]
pub struct GenerationCycle {
    pub id: CycleId,
    pub cycle_type: CycleType,
    pub status: CycleStatus,
    pub blueprint_id: BlueprintId,
    pub event_id: EventId,
    pub agent_id: AgentId,
    pub progress_current: Option<usize>,
    pub progress_total: Option<usize>,
    /// Cost breakdown and provenance, merged object-wise on update
    pub metadata: Value,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationCycle {
    pub fn new(
        cycle_type: CycleType,
        blueprint_id: BlueprintId,
        event_id: EventId,
        agent_id: AgentId,
    ) -> Self {
        Self {
            id: CycleId::generate(),
            cycle_type,
            status: CycleStatus::Started,
            blueprint_id,
            event_id,
            agent_id,
            progress_current: None,
            progress_total: None,
            metadata: Value::Object(serde_json::Map::new()),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A cycle governs active data unless it has been superseded
    pub fn is_active(&self) -> bool {
        self.status != CycleStatus::Superseded
    }
}

/// Shallow object-level merge of cycle metadata.
///
/// Keys in `update` replace keys in `base`; non-object values replace the
/// base wholesale. This keeps concurrently-attached cost data from being
/// clobbered by later progress updates.
pub fn merge_metadata(base: &Value, update: &Value) -> Value {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in update_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => update.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_and_status_roundtrip() {
        for t in [
            CycleType::Blueprint,
            CycleType::Research,
            CycleType::Glossary,
            CycleType::Chunks,
        ] {
            assert_eq!(CycleType::parse(t.as_str()), Some(t));
        }
        for s in [
            CycleStatus::Started,
            CycleStatus::Processing,
            CycleStatus::Completed,
            CycleStatus::Failed,
            CycleStatus::Superseded,
        ] {
            assert_eq!(CycleStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(CycleType::parse("nope"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CycleStatus::Started.is_terminal());
        assert!(!CycleStatus::Processing.is_terminal());
        assert!(CycleStatus::Completed.is_terminal());
        assert!(CycleStatus::Failed.is_terminal());
        assert!(CycleStatus::Superseded.is_terminal());
    }

    #[test]
    fn test_new_cycle_defaults() {
        let cycle = GenerationCycle::new(
            CycleType::Research,
            BlueprintId::new("bp"),
            EventId::new("evt"),
            AgentId::new("agent"),
        );
        assert_eq!(cycle.status, CycleStatus::Started);
        assert!(cycle.is_active());
        assert!(cycle.completed_at.is_none());
        assert_eq!(cycle.metadata, json!({}));
    }

    #[test]
    fn test_merge_metadata_preserves_existing_keys() {
        let base = json!({"cost": {"research": 1.0}, "queries": 12});
        let update = json!({"polled": 3});
        let merged = merge_metadata(&base, &update);
        assert_eq!(merged["cost"]["research"], 1.0);
        assert_eq!(merged["queries"], 12);
        assert_eq!(merged["polled"], 3);
    }

    #[test]
    fn test_merge_metadata_update_wins_on_conflict() {
        let base = json!({"queries": 12});
        let update = json!({"queries": 15});
        assert_eq!(merge_metadata(&base, &update)["queries"], 15);
    }
}
