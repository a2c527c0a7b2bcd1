pub mod agent;
pub mod blueprint;
pub mod chunk;
pub mod cycle;
pub mod error;
pub mod glossary;
pub mod research;

pub use agent::{Agent, AgentStage, AgentStatus};
pub use blueprint::{
    Blueprint, BlueprintStatus, ChunksPlan, CostBreakdown, GlossaryPlan, GlossaryTermPlan,
    QualityTier, ResearchPlan,
};
pub use chunk::{ChunkMetadata, ChunkSource, ContextItem};
pub use cycle::{merge_metadata, CycleStatus, CycleType, GenerationCycle};
pub use error::{ErrorCategory, ErrorClassifier, LoomError, ProviderError, Result, ResultExt};
pub use glossary::{GlossaryTerm, TermDefinition};
pub use research::{ResearchApi, ResearchQuery, ResearchResult, ResearchResultMetadata};

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Domain Newtypes
// =============================================================================

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype! {
    /// Type-safe wrapper for event identifiers
    EventId
}

id_newtype! {
    /// Type-safe wrapper for agent identifiers
    AgentId
}

id_newtype! {
    /// Type-safe wrapper for blueprint identifiers
    BlueprintId
}

id_newtype! {
    /// Type-safe wrapper for generation cycle identifiers
    CycleId
}

// =============================================================================
// Cycle Ownership
// =============================================================================

/// Ownership tag linking a stored row to its generation cycle.
///
/// `Legacy` rows predate cycle governance and are always considered active.
/// `Owned` rows are active only while the referenced cycle is not superseded.
/// Maps to a nullable `generation_cycle_id` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CycleRef {
    Owned(CycleId),
    Legacy,
}

impl CycleRef {
    /// Cycle ID when owned, None for legacy rows
    pub fn cycle_id(&self) -> Option<&CycleId> {
        match self {
            Self::Owned(id) => Some(id),
            Self::Legacy => None,
        }
    }

    /// Build from a nullable column value
    pub fn from_column(value: Option<String>) -> Self {
        match value {
            Some(id) => Self::Owned(CycleId::new(id)),
            None => Self::Legacy,
        }
    }

    /// Nullable column value for persistence
    pub fn to_column(&self) -> Option<&str> {
        self.cycle_id().map(|id| id.as_str())
    }
}

impl From<CycleId> for CycleRef {
    fn from(id: CycleId) -> Self {
        Self::Owned(id)
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = EventId::new("evt-1");
        assert_eq!(id.as_str(), "evt-1");
        assert_eq!(format!("{}", id), "evt-1");
        assert_eq!(EventId::from("evt-1".to_string()), id);
    }

    #[test]
    fn test_generate_unique() {
        assert_ne!(CycleId::generate(), CycleId::generate());
    }

    #[test]
    fn test_cycle_ref_column_mapping() {
        let owned = CycleRef::from_column(Some("cyc-1".to_string()));
        assert_eq!(owned.cycle_id().map(|c| c.as_str()), Some("cyc-1"));
        assert_eq!(owned.to_column(), Some("cyc-1"));

        let legacy = CycleRef::from_column(None);
        assert_eq!(legacy, CycleRef::Legacy);
        assert_eq!(legacy.to_column(), None);
    }
}
