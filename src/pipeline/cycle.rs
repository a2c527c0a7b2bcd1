//! Generation Cycle Manager
//!
//! Every pipeline stage execution is recorded as one cycle row. The manager
//! is the only mutation path for cycle rows: callers never touch status or
//! metadata directly, so the state machine and the metadata-merge rule are
//! enforced in one place.

use serde_json::Value;
use tracing::info;

use crate::store::SharedDatabase;
use crate::types::{
    AgentId, BlueprintId, CycleId, CycleStatus, CycleType, EventId, GenerationCycle, Result,
};

/// Create, advance, and supersede generation cycles.
#[derive(Clone)]
pub struct GenerationCycleManager {
    db: SharedDatabase,
}

impl GenerationCycleManager {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Create a new cycle in `started` status
    pub fn begin(
        &self,
        cycle_type: CycleType,
        blueprint_id: &BlueprintId,
        event_id: &EventId,
        agent_id: &AgentId,
    ) -> Result<GenerationCycle> {
        let cycle = GenerationCycle::new(
            cycle_type,
            blueprint_id.clone(),
            event_id.clone(),
            agent_id.clone(),
        );
        self.db.insert_cycle(&cycle)?;
        info!(cycle_id = %cycle.id, %cycle_type, "Started generation cycle");
        Ok(cycle)
    }

    /// Mark a cycle as actively working
    pub fn start_processing(&self, cycle_id: &CycleId) -> Result<()> {
        self.db
            .update_cycle_status(cycle_id, CycleStatus::Processing, None)
    }

    /// Update progress counters. Counters only move forward; a stale update
    /// below the stored value is ignored rather than rewound.
    pub fn set_progress(&self, cycle_id: &CycleId, current: usize, total: usize) -> Result<()> {
        if let Some(existing) = self.db.get_cycle(cycle_id)? {
            let floor = existing.progress_current.unwrap_or(0);
            if current < floor {
                return Ok(());
            }
        }
        self.db.update_cycle_progress(cycle_id, current, total)
    }

    /// Merge cost/provenance data into the cycle's metadata object
    pub fn attach_metadata(&self, cycle_id: &CycleId, update: &Value) -> Result<()> {
        self.db.merge_cycle_metadata(cycle_id, update)
    }

    /// Terminal success transition; sets `completed_at`
    pub fn complete(&self, cycle_id: &CycleId) -> Result<()> {
        info!(%cycle_id, "Cycle completed");
        self.db
            .update_cycle_status(cycle_id, CycleStatus::Completed, None)
    }

    /// Terminal failure transition with a human-readable message
    pub fn fail(&self, cycle_id: &CycleId, message: &str) -> Result<()> {
        info!(%cycle_id, %message, "Cycle failed");
        self.db
            .update_cycle_status(cycle_id, CycleStatus::Failed, Some(message))
    }

    /// Supersede all prior cycles of a type for an event.
    ///
    /// Must be called before inserting the replacement cycle, so the new
    /// cycle is never caught by its own supersession sweep.
    pub fn supersede_stage(&self, event_id: &EventId, cycle_type: CycleType) -> Result<usize> {
        let count = self.db.supersede_cycles(event_id, cycle_type)?;
        if count > 0 {
            info!(%event_id, %cycle_type, count, "Superseded prior cycles");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::types::Blueprint;
    use std::sync::Arc;

    fn setup() -> (GenerationCycleManager, SharedDatabase, EventId, AgentId, BlueprintId) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let event = db.create_event("Fusion Expo", None).unwrap();
        let agent = db.create_agent(&event.id, "planner").unwrap();
        let blueprint = Blueprint::new(event.id.clone(), agent.id.clone());
        db.insert_blueprint(&blueprint).unwrap();
        (
            GenerationCycleManager::new(db.clone()),
            db,
            event.id,
            agent.id,
            blueprint.id,
        )
    }

    #[test]
    fn test_full_lifecycle() {
        let (manager, db, event_id, agent_id, blueprint_id) = setup();

        let cycle = manager
            .begin(CycleType::Research, &blueprint_id, &event_id, &agent_id)
            .unwrap();
        manager.start_processing(&cycle.id).unwrap();
        manager.set_progress(&cycle.id, 2, 5).unwrap();
        manager.complete(&cycle.id).unwrap();

        let loaded = db.get_cycle(&cycle.id).unwrap().unwrap();
        assert_eq!(loaded.status, CycleStatus::Completed);
        assert_eq!(loaded.progress_current, Some(2));
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn test_progress_never_rewinds() {
        let (manager, db, event_id, agent_id, blueprint_id) = setup();
        let cycle = manager
            .begin(CycleType::Glossary, &blueprint_id, &event_id, &agent_id)
            .unwrap();

        manager.set_progress(&cycle.id, 4, 10).unwrap();
        manager.set_progress(&cycle.id, 2, 10).unwrap();

        let loaded = db.get_cycle(&cycle.id).unwrap().unwrap();
        assert_eq!(loaded.progress_current, Some(4));
    }

    #[test]
    fn test_supersede_stage_excludes_new_cycle() {
        let (manager, db, event_id, agent_id, blueprint_id) = setup();

        let old = manager
            .begin(CycleType::Chunks, &blueprint_id, &event_id, &agent_id)
            .unwrap();
        manager.complete(&old.id).unwrap();

        // Supersede first, then insert the replacement
        let count = manager.supersede_stage(&event_id, CycleType::Chunks).unwrap();
        assert_eq!(count, 1);
        let fresh = manager
            .begin(CycleType::Chunks, &blueprint_id, &event_id, &agent_id)
            .unwrap();

        let old_loaded = db.get_cycle(&old.id).unwrap().unwrap();
        let fresh_loaded = db.get_cycle(&fresh.id).unwrap().unwrap();
        assert_eq!(old_loaded.status, CycleStatus::Superseded);
        assert_eq!(fresh_loaded.status, CycleStatus::Started);
    }

    #[test]
    fn test_supersede_is_idempotent() {
        let (manager, _db, event_id, agent_id, blueprint_id) = setup();
        let cycle = manager
            .begin(CycleType::Research, &blueprint_id, &event_id, &agent_id)
            .unwrap();
        manager.complete(&cycle.id).unwrap();

        manager.supersede_stage(&event_id, CycleType::Research).unwrap();
        // Second sweep finds nothing to flip and succeeds
        let count = manager.supersede_stage(&event_id, CycleType::Research).unwrap();
        assert_eq!(count, 0);
    }
}
