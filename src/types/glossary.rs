//! Glossary Data Model
//!
//! Terms are unique per event (case-insensitive); persistence is an upsert
//! keyed on the lowercased term.

use serde::{Deserialize, Serialize};

use super::{CycleRef, EventId};

/// Structured definition produced by the Q&A polish pass or LLM generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermDefinition {
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub acronym_for: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub usage_examples: Vec<String>,
    #[serde(default)]
    pub related_terms: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
}

fn default_confidence() -> f64 {
    0.7
}

/// One glossary row tied to its generation cycle
#[derive(Debug, Clone)]
pub struct GlossaryTerm {
    pub id: String,
    pub event_id: EventId,
    pub cycle: CycleRef,
    pub term: String,
    pub definition: String,
    pub acronym_for: Option<String>,
    pub category: Option<String>,
    pub usage_examples: Vec<String>,
    pub related_terms: Vec<String>,
    pub confidence_score: f64,
    /// Provider that produced the definition ("qa", "llm")
    pub source: String,
    pub source_url: Option<String>,
}

impl GlossaryTerm {
    pub fn from_definition(
        event_id: EventId,
        cycle: CycleRef,
        term: impl Into<String>,
        definition: TermDefinition,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id,
            cycle,
            term: term.into(),
            definition: definition.definition,
            acronym_for: definition.acronym_for,
            category: definition.category,
            usage_examples: definition.usage_examples,
            related_terms: definition.related_terms,
            confidence_score: definition.confidence_score,
            source: source.into(),
            source_url: None,
        }
    }

    /// Upsert key: lowercased term
    pub fn normalized_term(&self) -> String {
        self.term.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_term_is_case_insensitive() {
        let a = GlossaryTerm::from_definition(
            EventId::new("evt"),
            CycleRef::Legacy,
            "API",
            TermDefinition::default(),
            "llm",
        );
        let b = GlossaryTerm::from_definition(
            EventId::new("evt"),
            CycleRef::Legacy,
            "api",
            TermDefinition::default(),
            "llm",
        );
        assert_eq!(a.normalized_term(), b.normalized_term());
    }

    #[test]
    fn test_definition_parses_from_partial_json() {
        let def: TermDefinition =
            serde_json::from_str(r#"{"definition": "a thing"}"#).unwrap();
        assert_eq!(def.definition, "a thing");
        assert!(def.usage_examples.is_empty());
        assert!((def.confidence_score - 0.7).abs() < f64::EPSILON);
    }
}
