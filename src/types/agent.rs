//! Agent Data Model
//!
//! Coarse status plus fine-grained pipeline stage, mutated exclusively by
//! the orchestrator as generation advances.

use serde::{Deserialize, Serialize};

use super::{AgentId, EventId};

/// Coarse agent health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "active" => Self::Active,
            _ => Self::Error,
        }
    }
}

/// Fine-grained generation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStage {
    Blueprint,
    Researching,
    BuildingGlossary,
    BuildingChunks,
    ContextComplete,
    Error,
}

impl AgentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blueprint => "blueprint",
            Self::Researching => "researching",
            Self::BuildingGlossary => "building_glossary",
            Self::BuildingChunks => "building_chunks",
            Self::ContextComplete => "context_complete",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "blueprint" => Self::Blueprint,
            "researching" => Self::Researching,
            "building_glossary" => Self::BuildingGlossary,
            "building_chunks" => Self::BuildingChunks,
            "context_complete" => Self::ContextComplete,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for AgentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A consuming agent attached to one event
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub event_id: EventId,
    pub name: String,
    pub status: AgentStatus,
    pub stage: AgentStage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            AgentStage::Blueprint,
            AgentStage::Researching,
            AgentStage::BuildingGlossary,
            AgentStage::BuildingChunks,
            AgentStage::ContextComplete,
            AgentStage::Error,
        ] {
            assert_eq!(AgentStage::parse(stage.as_str()), stage);
        }
    }

    #[test]
    fn test_unknown_strings_degrade_to_error() {
        assert_eq!(AgentStage::parse("warp_drive"), AgentStage::Error);
        assert_eq!(AgentStatus::parse("warp_drive"), AgentStatus::Error);
    }
}
