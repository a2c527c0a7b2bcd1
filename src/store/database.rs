//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite storage for events, agents, blueprints, generation cycles, and the
//! rows those cycles produce. Features:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode for read/write concurrency
//!
//! Rows carry a nullable `generation_cycle_id`. A row is ACTIVE when its
//! cycle id is NULL (legacy data) or its cycle has not been superseded; all
//! read paths filter on that predicate.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use serde_json::Value;

use crate::types::{
    Agent, AgentId, AgentStage, AgentStatus, Blueprint, BlueprintId, BlueprintStatus,
    ChunkMetadata, ChunkSource, ContextItem, CycleId, CycleRef, CycleStatus, CycleType, EventId,
    GenerationCycle, GlossaryTerm, LoomError, ResearchApi, ResearchResult, ResearchResultMetadata,
    Result, ResultExt,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Add source_url column to glossary_terms",
    up: "ALTER TABLE glossary_terms ADD COLUMN source_url TEXT",
}];

/// One event row
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: EventId,
    pub topic: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-stage row counts for one event, for status reporting
#[derive(Debug, Clone, Default)]
pub struct EventSummary {
    pub research_results: usize,
    pub glossary_terms: usize,
    pub context_items: usize,
    pub documents: usize,
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 4;
    const MAX_POOL_SIZE: u32 = 32;

    /// clamp(cores * 2, MIN, MAX): two connections per core with bounds
    pub fn optimal_pool_size() -> u32 {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE)
    }

    pub fn auto() -> Self {
        let max_size = Self::optimal_pool_size();
        Self {
            max_size,
            min_idle: (max_size / 4).max(2),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| LoomError::Storage(format!("Failed to create connection pool: {e}")))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| LoomError::Storage(format!("Failed to create in-memory pool: {e}")))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| LoomError::Storage(format!("Failed to acquire database connection: {e}")))
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        // schema.sql is current; migrations only apply to older databases
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .with_context("Failed to set schema version")?;

        drop(conn);
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;
                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure panics, the transaction rolls back and an error is
    /// returned instead of poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + std::panic::UnwindSafe,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(LoomError::Storage(format!(
                    "Transaction panicked: {panic_msg}"
                )))
            }
        }
    }

    // =========================================================================
    // Events and Agents
    // =========================================================================

    pub fn create_event(&self, topic: &str, description: Option<&str>) -> Result<EventRecord> {
        let record = EventRecord {
            id: EventId::generate(),
            topic: topic.to_string(),
            description: description.map(String::from),
            created_at: Utc::now(),
        };

        self.conn()?
            .execute(
                "INSERT INTO events (id, topic, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id.as_str(),
                    record.topic,
                    record.description,
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to create event")?;

        Ok(record)
    }

    pub fn get_event(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT id, topic, description, created_at FROM events WHERE id = ?1",
            params![event_id.as_str()],
            |row| {
                Ok(EventRecord {
                    id: EventId::new(row.get::<_, String>(0)?),
                    topic: row.get(1)?,
                    description: row.get(2)?,
                    created_at: parse_timestamp(&row.get::<_, String>(3)?),
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn create_agent(&self, event_id: &EventId, name: &str) -> Result<Agent> {
        let agent = Agent {
            id: AgentId::generate(),
            event_id: event_id.clone(),
            name: name.to_string(),
            status: AgentStatus::Idle,
            stage: AgentStage::Blueprint,
        };

        self.conn()?
            .execute(
                "INSERT INTO agents (id, event_id, name, status, stage, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agent.id.as_str(),
                    agent.event_id.as_str(),
                    agent.name,
                    agent.status.as_str(),
                    agent.stage.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context("Failed to create agent")?;

        Ok(agent)
    }

    pub fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT id, event_id, name, status, stage FROM agents WHERE id = ?1",
            params![agent_id.as_str()],
            |row| {
                Ok(Agent {
                    id: AgentId::new(row.get::<_, String>(0)?),
                    event_id: EventId::new(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                    status: AgentStatus::parse(&row.get::<_, String>(3)?),
                    stage: AgentStage::parse(&row.get::<_, String>(4)?),
                })
            },
        );

        match result {
            Ok(agent) => Ok(Some(agent)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance an agent's coarse status and pipeline stage
    pub fn update_agent_stage(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
        stage: AgentStage,
    ) -> Result<()> {
        let affected = self
            .conn()?
            .execute(
                "UPDATE agents SET status = ?1, stage = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    stage.as_str(),
                    Utc::now().to_rfc3339(),
                    agent_id.as_str(),
                ],
            )
            .with_context("Failed to update agent stage")?;

        if affected == 0 {
            return Err(LoomError::NotFound(format!("agent {agent_id}")));
        }
        Ok(())
    }

    // =========================================================================
    // Blueprints
    // =========================================================================

    pub fn insert_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO blueprints
                 (id, event_id, agent_id, status, error_message, important_details,
                  inferred_topics, key_terms, research_plan, glossary_plan, chunks_plan,
                  estimated_costs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    blueprint.id.as_str(),
                    blueprint.event_id.as_str(),
                    blueprint.agent_id.as_str(),
                    blueprint.status.as_str(),
                    blueprint.error_message,
                    to_json(&blueprint.important_details)?,
                    to_json(&blueprint.inferred_topics)?,
                    to_json(&blueprint.key_terms)?,
                    to_json(&blueprint.research_plan)?,
                    to_json(&blueprint.glossary_plan)?,
                    to_json(&blueprint.chunks_plan)?,
                    to_json(&blueprint.cost_breakdown)?,
                    blueprint.created_at.to_rfc3339(),
                    blueprint.updated_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to insert blueprint")?;
        Ok(())
    }

    /// Rewrite a blueprint's content and status in place
    pub fn update_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        let affected = self
            .conn()?
            .execute(
                "UPDATE blueprints SET
                   status = ?1, error_message = ?2, important_details = ?3,
                   inferred_topics = ?4, key_terms = ?5, research_plan = ?6,
                   glossary_plan = ?7, chunks_plan = ?8, estimated_costs = ?9,
                   updated_at = ?10
                 WHERE id = ?11",
                params![
                    blueprint.status.as_str(),
                    blueprint.error_message,
                    to_json(&blueprint.important_details)?,
                    to_json(&blueprint.inferred_topics)?,
                    to_json(&blueprint.key_terms)?,
                    to_json(&blueprint.research_plan)?,
                    to_json(&blueprint.glossary_plan)?,
                    to_json(&blueprint.chunks_plan)?,
                    to_json(&blueprint.cost_breakdown)?,
                    Utc::now().to_rfc3339(),
                    blueprint.id.as_str(),
                ],
            )
            .with_context("Failed to update blueprint")?;

        if affected == 0 {
            return Err(LoomError::NotFound(format!("blueprint {}", blueprint.id)));
        }
        Ok(())
    }

    pub fn update_blueprint_status(
        &self,
        blueprint_id: &BlueprintId,
        status: BlueprintStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let affected = self
            .conn()?
            .execute(
                "UPDATE blueprints SET status = ?1, error_message = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    error_message,
                    Utc::now().to_rfc3339(),
                    blueprint_id.as_str(),
                ],
            )
            .with_context("Failed to update blueprint status")?;

        if affected == 0 {
            return Err(LoomError::NotFound(format!("blueprint {blueprint_id}")));
        }
        Ok(())
    }

    pub fn get_blueprint(&self, blueprint_id: &BlueprintId) -> Result<Option<Blueprint>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("{BLUEPRINT_SELECT} WHERE id = ?1"),
            params![blueprint_id.as_str()],
            map_blueprint_row,
        );

        match result {
            Ok(blueprint) => Ok(Some(blueprint)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent non-superseded blueprint for an event+agent pair
    pub fn latest_blueprint(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
    ) -> Result<Option<Blueprint>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "{BLUEPRINT_SELECT}
                 WHERE event_id = ?1 AND agent_id = ?2 AND status != 'superseded'
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![event_id.as_str(), agent_id.as_str()],
            map_blueprint_row,
        );

        match result {
            Ok(blueprint) => Ok(Some(blueprint)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark all other blueprints for this event+agent pair as superseded
    pub fn supersede_blueprints(
        &self,
        event_id: &EventId,
        agent_id: &AgentId,
        keep: &BlueprintId,
    ) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE blueprints SET status = 'superseded', updated_at = ?1
                 WHERE event_id = ?2 AND agent_id = ?3 AND id != ?4 AND status != 'superseded'",
                params![
                    Utc::now().to_rfc3339(),
                    event_id.as_str(),
                    agent_id.as_str(),
                    keep.as_str(),
                ],
            )
            .with_context("Failed to supersede blueprints")
    }

    // =========================================================================
    // Generation Cycles
    // =========================================================================

    pub fn insert_cycle(&self, cycle: &GenerationCycle) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO generation_cycles
                 (id, cycle_type, status, blueprint_id, event_id, agent_id,
                  progress_current, progress_total, metadata, error_message,
                  started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    cycle.id.as_str(),
                    cycle.cycle_type.as_str(),
                    cycle.status.as_str(),
                    cycle.blueprint_id.as_str(),
                    cycle.event_id.as_str(),
                    cycle.agent_id.as_str(),
                    cycle.progress_current.map(|v| v as i64),
                    cycle.progress_total.map(|v| v as i64),
                    to_json(&cycle.metadata)?,
                    cycle.error_message,
                    cycle.started_at.to_rfc3339(),
                    cycle.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .with_context("Failed to insert generation cycle")?;
        Ok(())
    }

    pub fn get_cycle(&self, cycle_id: &CycleId) -> Result<Option<GenerationCycle>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("{CYCLE_SELECT} WHERE id = ?1"),
            params![cycle_id.as_str()],
            map_cycle_row,
        );

        match result {
            Ok(cycle) => Ok(Some(cycle)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Transition a cycle's status, enforcing the state machine.
    ///
    /// Completed and failed cycles admit only the superseded transition;
    /// superseding an already-superseded cycle is an idempotent no-op.
    pub fn update_cycle_status(
        &self,
        cycle_id: &CycleId,
        status: CycleStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let id = cycle_id.clone();
        let error_message = error_message.map(String::from);

        self.transaction(move |conn| {
            let current: CycleStatus = conn
                .query_row(
                    "SELECT status FROM generation_cycles WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .map_err(|_| LoomError::NotFound(format!("generation cycle {id}")))
                .map(|s| CycleStatus::parse(&s).unwrap_or(CycleStatus::Failed))?;

            if current == CycleStatus::Superseded && status == CycleStatus::Superseded {
                return Ok(());
            }
            if current.is_terminal() && status != CycleStatus::Superseded {
                return Err(LoomError::Storage(format!(
                    "invalid cycle transition {current} -> {status} for {id}"
                )));
            }

            let completed_at = matches!(status, CycleStatus::Completed | CycleStatus::Failed)
                .then(|| Utc::now().to_rfc3339());

            conn.execute(
                "UPDATE generation_cycles
                 SET status = ?1, error_message = COALESCE(?2, error_message),
                     completed_at = COALESCE(?3, completed_at)
                 WHERE id = ?4",
                params![status.as_str(), error_message, completed_at, id.as_str()],
            )
            .with_context("Failed to update cycle status")?;

            Ok(())
        })
    }

    pub fn update_cycle_progress(
        &self,
        cycle_id: &CycleId,
        current: usize,
        total: usize,
    ) -> Result<()> {
        let affected = self
            .conn()?
            .execute(
                "UPDATE generation_cycles SET progress_current = ?1, progress_total = ?2
                 WHERE id = ?3",
                params![current as i64, total as i64, cycle_id.as_str()],
            )
            .with_context("Failed to update cycle progress")?;

        if affected == 0 {
            return Err(LoomError::NotFound(format!("generation cycle {cycle_id}")));
        }
        Ok(())
    }

    /// Merge new keys into a cycle's metadata object.
    ///
    /// Existing keys not present in `update` are preserved; conflicting
    /// keys take the updated value.
    pub fn merge_cycle_metadata(&self, cycle_id: &CycleId, update: &Value) -> Result<()> {
        let id = cycle_id.clone();
        let update = update.clone();

        self.transaction(move |conn| {
            let current: String = conn
                .query_row(
                    "SELECT metadata FROM generation_cycles WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|_| LoomError::NotFound(format!("generation cycle {id}")))?;

            let base: Value = serde_json::from_str(&current).unwrap_or(Value::Null);
            let merged = crate::types::merge_metadata(&base, &update);

            conn.execute(
                "UPDATE generation_cycles SET metadata = ?1 WHERE id = ?2",
                params![to_json(&merged)?, id.as_str()],
            )
            .with_context("Failed to merge cycle metadata")?;

            Ok(())
        })
    }

    /// Supersede every non-superseded cycle of a type for an event.
    ///
    /// Called at the start of a regeneration run so that rows belonging to
    /// earlier cycles drop out of the active set atomically.
    pub fn supersede_cycles(&self, event_id: &EventId, cycle_type: CycleType) -> Result<usize> {
        self.conn()?
            .execute(
                "UPDATE generation_cycles SET status = 'superseded'
                 WHERE event_id = ?1 AND cycle_type = ?2 AND status != 'superseded'",
                params![event_id.as_str(), cycle_type.as_str()],
            )
            .with_context("Failed to supersede cycles")
    }

    /// Most recent non-superseded cycle of a type for an event
    pub fn active_cycle(
        &self,
        event_id: &EventId,
        cycle_type: CycleType,
    ) -> Result<Option<GenerationCycle>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "{CYCLE_SELECT}
                 WHERE event_id = ?1 AND cycle_type = ?2 AND status != 'superseded'
                 ORDER BY started_at DESC LIMIT 1"
            ),
            params![event_id.as_str(), cycle_type.as_str()],
            map_cycle_row,
        );

        match result {
            Ok(cycle) => Ok(Some(cycle)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Research Results
    // =========================================================================

    pub fn insert_research_result(&self, result: &ResearchResult) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO research_results
                 (id, blueprint_id, generation_cycle_id, content, query, api,
                  source_url, quality_score, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    result.id,
                    result.blueprint_id.as_str(),
                    result.cycle.to_column(),
                    result.content,
                    result.query,
                    result.api.as_str(),
                    result.source_url,
                    result.quality_score,
                    to_json(&result.metadata)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context("Failed to insert research result")?;
        Ok(())
    }

    /// Active research results for a blueprint: rows whose cycle is NULL or
    /// not superseded
    pub fn research_for_blueprint(&self, blueprint_id: &BlueprintId) -> Result<Vec<ResearchResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.blueprint_id, r.generation_cycle_id, r.content, r.query,
                    r.api, r.source_url, r.quality_score, r.metadata
             FROM research_results r
             LEFT JOIN generation_cycles c ON r.generation_cycle_id = c.id
             WHERE r.blueprint_id = ?1
               AND (r.generation_cycle_id IS NULL OR c.status != 'superseded')
             ORDER BY r.created_at",
        )?;

        let rows: Vec<_> = stmt
            .query_map(params![blueprint_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch research results")?;

        let mut results = Vec::with_capacity(rows.len());
        for (id, bp, cycle, content, query, api, source_url, quality_score, metadata_str) in rows {
            let metadata: ResearchResultMetadata = serde_json::from_str(&metadata_str)
                .with_context_fn(|| format!("Corrupted research metadata for {id}"))?;
            results.push(ResearchResult {
                id,
                blueprint_id: BlueprintId::new(bp),
                cycle: CycleRef::from_column(cycle),
                content,
                query,
                api: ResearchApi::parse(&api),
                source_url,
                quality_score,
                metadata,
            });
        }

        Ok(results)
    }

    // =========================================================================
    // Glossary Terms
    // =========================================================================

    /// Insert or update a term, keyed case-insensitively per event.
    ///
    /// A regenerated definition for an existing term replaces the old row's
    /// content and re-ties it to the new cycle; the row id is preserved.
    pub fn upsert_glossary_term(&self, term: &GlossaryTerm) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn()?
            .execute(
                "INSERT INTO glossary_terms
                 (id, event_id, generation_cycle_id, term, term_normalized, definition,
                  acronym_for, category, usage_examples, related_terms, confidence_score,
                  source, source_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                 ON CONFLICT(event_id, term_normalized) DO UPDATE SET
                   generation_cycle_id = excluded.generation_cycle_id,
                   term = excluded.term,
                   definition = excluded.definition,
                   acronym_for = excluded.acronym_for,
                   category = excluded.category,
                   usage_examples = excluded.usage_examples,
                   related_terms = excluded.related_terms,
                   confidence_score = excluded.confidence_score,
                   source = excluded.source,
                   source_url = excluded.source_url,
                   updated_at = excluded.updated_at",
                params![
                    term.id,
                    term.event_id.as_str(),
                    term.cycle.to_column(),
                    term.term,
                    term.normalized_term(),
                    term.definition,
                    term.acronym_for,
                    term.category,
                    to_json(&term.usage_examples)?,
                    to_json(&term.related_terms)?,
                    term.confidence_score,
                    term.source,
                    term.source_url,
                    now,
                ],
            )
            .with_context("Failed to upsert glossary term")?;
        Ok(())
    }

    /// Active glossary terms for an event, alphabetical by normalized term
    pub fn glossary_for_event(&self, event_id: &EventId) -> Result<Vec<GlossaryTerm>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT g.id, g.event_id, g.generation_cycle_id, g.term, g.definition,
                    g.acronym_for, g.category, g.usage_examples, g.related_terms,
                    g.confidence_score, g.source, g.source_url
             FROM glossary_terms g
             LEFT JOIN generation_cycles c ON g.generation_cycle_id = c.id
             WHERE g.event_id = ?1
               AND (g.generation_cycle_id IS NULL OR c.status != 'superseded')
             ORDER BY g.term_normalized",
        )?;

        let rows: Vec<_> = stmt
            .query_map(params![event_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, f64>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, Option<String>>(11)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch glossary terms")?;

        let mut terms = Vec::with_capacity(rows.len());
        for (
            id,
            evt,
            cycle,
            term,
            definition,
            acronym_for,
            category,
            usage_str,
            related_str,
            confidence_score,
            source,
            source_url,
        ) in rows
        {
            let usage_examples: Vec<String> = serde_json::from_str(&usage_str)
                .with_context_fn(|| format!("Corrupted usage examples for term {id}"))?;
            let related_terms: Vec<String> = serde_json::from_str(&related_str)
                .with_context_fn(|| format!("Corrupted related terms for term {id}"))?;

            terms.push(GlossaryTerm {
                id,
                event_id: EventId::new(evt),
                cycle: CycleRef::from_column(cycle),
                term,
                definition,
                acronym_for,
                category,
                usage_examples,
                related_terms,
                confidence_score,
                source,
                source_url,
            });
        }

        Ok(terms)
    }

    // =========================================================================
    // Context Items
    // =========================================================================

    pub fn insert_context_item(&self, item: &ContextItem) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO context_items
                 (id, event_id, generation_cycle_id, chunk, embedding, rank, source,
                  metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item.id,
                    item.event_id.as_str(),
                    item.cycle.to_column(),
                    item.chunk,
                    to_json(&item.embedding)?,
                    item.rank as i64,
                    item.source.as_str(),
                    to_json(&item.metadata)?,
                    item.created_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to insert context item")?;
        Ok(())
    }

    /// Active context items for an event in rank order
    pub fn context_items_for_event(&self, event_id: &EventId) -> Result<Vec<ContextItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, i.event_id, i.generation_cycle_id, i.chunk, i.embedding,
                    i.rank, i.source, i.metadata, i.created_at
             FROM context_items i
             LEFT JOIN generation_cycles c ON i.generation_cycle_id = c.id
             WHERE i.event_id = ?1
               AND (i.generation_cycle_id IS NULL OR c.status != 'superseded')
             ORDER BY i.rank",
        )?;

        let rows: Vec<_> = stmt
            .query_map(params![event_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch context items")?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, evt, cycle, chunk, embedding_str, rank, source, metadata_str, created_at) in rows {
            let embedding: Vec<f32> = serde_json::from_str(&embedding_str)
                .with_context_fn(|| format!("Corrupted embedding for item {id}"))?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_str)
                .with_context_fn(|| format!("Corrupted chunk metadata for item {id}"))?;

            items.push(ContextItem {
                id,
                event_id: EventId::new(evt),
                cycle: CycleRef::from_column(cycle),
                chunk,
                embedding,
                rank: rank as usize,
                source: ChunkSource::parse(&source),
                metadata,
                created_at: parse_timestamp(&created_at),
            });
        }

        Ok(items)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Store extracted source-document text for an event
    pub fn insert_document(
        &self,
        event_id: &EventId,
        title: Option<&str>,
        content: &str,
        source_url: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn()?
            .execute(
                "INSERT INTO documents (id, event_id, title, content, source_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    event_id.as_str(),
                    title,
                    content,
                    source_url,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context("Failed to insert document")?;
        Ok(id)
    }

    pub fn documents_for_event(&self, event_id: &EventId) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(title, ''), content FROM documents
             WHERE event_id = ?1 ORDER BY created_at",
        )?;

        let docs = stmt
            .query_map(params![event_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch documents")?;

        Ok(docs)
    }

    // =========================================================================
    // Status Reporting
    // =========================================================================

    /// Active row counts per stage for one event
    pub fn event_summary(&self, event_id: &EventId) -> Result<EventSummary> {
        let conn = self.conn()?;

        let research_results: i64 = conn.query_row(
            "SELECT COUNT(*) FROM research_results r
             JOIN blueprints b ON r.blueprint_id = b.id
             LEFT JOIN generation_cycles c ON r.generation_cycle_id = c.id
             WHERE b.event_id = ?1
               AND (r.generation_cycle_id IS NULL OR c.status != 'superseded')",
            params![event_id.as_str()],
            |row| row.get(0),
        )?;

        let glossary_terms: i64 = conn.query_row(
            "SELECT COUNT(*) FROM glossary_terms g
             LEFT JOIN generation_cycles c ON g.generation_cycle_id = c.id
             WHERE g.event_id = ?1
               AND (g.generation_cycle_id IS NULL OR c.status != 'superseded')",
            params![event_id.as_str()],
            |row| row.get(0),
        )?;

        let context_items: i64 = conn.query_row(
            "SELECT COUNT(*) FROM context_items i
             LEFT JOIN generation_cycles c ON i.generation_cycle_id = c.id
             WHERE i.event_id = ?1
               AND (i.generation_cycle_id IS NULL OR c.status != 'superseded')",
            params![event_id.as_str()],
            |row| row.get(0),
        )?;

        let documents: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE event_id = ?1",
            params![event_id.as_str()],
            |row| row.get(0),
        )?;

        Ok(EventSummary {
            research_results: research_results as usize,
            glossary_terms: glossary_terms as usize,
            context_items: context_items as usize,
            documents: documents as usize,
        })
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

const BLUEPRINT_SELECT: &str = "SELECT id, event_id, agent_id, status, error_message,
    important_details, inferred_topics, key_terms, research_plan, glossary_plan,
    chunks_plan, estimated_costs, created_at, updated_at FROM blueprints";

fn map_blueprint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Blueprint> {
    Ok(Blueprint {
        id: BlueprintId::new(row.get::<_, String>(0)?),
        event_id: EventId::new(row.get::<_, String>(1)?),
        agent_id: AgentId::new(row.get::<_, String>(2)?),
        status: BlueprintStatus::parse(&row.get::<_, String>(3)?),
        error_message: row.get(4)?,
        important_details: from_json_or_default(&row.get::<_, String>(5)?),
        inferred_topics: from_json_or_default(&row.get::<_, String>(6)?),
        key_terms: from_json_or_default(&row.get::<_, String>(7)?),
        research_plan: from_json_or_default(&row.get::<_, String>(8)?),
        glossary_plan: from_json_or_default(&row.get::<_, String>(9)?),
        chunks_plan: from_json_or_default(&row.get::<_, String>(10)?),
        cost_breakdown: from_json_or_default(&row.get::<_, String>(11)?),
        created_at: parse_timestamp(&row.get::<_, String>(12)?),
        updated_at: parse_timestamp(&row.get::<_, String>(13)?),
    })
}

const CYCLE_SELECT: &str = "SELECT id, cycle_type, status, blueprint_id, event_id, agent_id,
    progress_current, progress_total, metadata, error_message, started_at, completed_at
    FROM generation_cycles";

fn map_cycle_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenerationCycle> {
    Ok(GenerationCycle {
        id: CycleId::new(row.get::<_, String>(0)?),
        cycle_type: CycleType::parse(&row.get::<_, String>(1)?).unwrap_or(CycleType::Blueprint),
        status: CycleStatus::parse(&row.get::<_, String>(2)?).unwrap_or(CycleStatus::Failed),
        blueprint_id: BlueprintId::new(row.get::<_, Option<String>>(3)?.unwrap_or_default()),
        event_id: EventId::new(row.get::<_, String>(4)?),
        agent_id: AgentId::new(row.get::<_, Option<String>>(5)?.unwrap_or_default()),
        progress_current: row.get::<_, Option<i64>>(6)?.map(|v| v as usize),
        progress_total: row.get::<_, Option<i64>>(7)?.map(|v| v as usize),
        metadata: serde_json::from_str(&row.get::<_, String>(8)?)
            .unwrap_or(Value::Object(serde_json::Map::new())),
        error_message: row.get(9)?,
        started_at: parse_timestamp(&row.get::<_, String>(10)?),
        completed_at: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_timestamp(&s)),
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).with_context("Failed to serialize for storage")
}

fn from_json_or_default<T: serde::de::DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TermDefinition;

    fn db() -> Database {
        let db = Database::open_in_memory().expect("open in-memory database");
        db.initialize().expect("initialize schema");
        db
    }

    fn seed(db: &Database) -> (EventRecord, Agent, Blueprint) {
        let event = db.create_event("WOMAD Festival 2025", None).unwrap();
        let agent = db.create_agent(&event.id, "scheduler").unwrap();
        let blueprint = Blueprint::new(event.id.clone(), agent.id.clone());
        db.insert_blueprint(&blueprint).unwrap();
        (event, agent, blueprint)
    }

    #[test]
    fn test_open_in_memory_creates_tables() {
        let db = db();
        let conn = db.connection().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "events",
            "agents",
            "blueprints",
            "generation_cycles",
            "research_results",
            "glossary_terms",
            "context_items",
            "documents",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_transaction_panic_safety() {
        let db = db();
        let result = db.transaction(|_conn| {
            panic!("Intentional panic for testing");
            #[allow(unreachable_code)]
            Ok(())
        });

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("panicked"));
        assert!(db.connection().is_ok());
    }

    #[test]
    fn test_blueprint_roundtrip_and_supersession() {
        let db = db();
        let (event, agent, mut blueprint) = seed(&db);

        blueprint.important_details = vec!["headline act".to_string()];
        blueprint.status = BlueprintStatus::Ready;
        db.update_blueprint(&blueprint).unwrap();

        let loaded = db.get_blueprint(&blueprint.id).unwrap().unwrap();
        assert_eq!(loaded.status, BlueprintStatus::Ready);
        assert_eq!(loaded.important_details, vec!["headline act"]);

        // A second blueprint supersedes the first
        let replacement = Blueprint::new(event.id.clone(), agent.id.clone());
        db.insert_blueprint(&replacement).unwrap();
        let count = db
            .supersede_blueprints(&event.id, &agent.id, &replacement.id)
            .unwrap();
        assert_eq!(count, 1);

        let latest = db.latest_blueprint(&event.id, &agent.id).unwrap().unwrap();
        assert_eq!(latest.id, replacement.id);
        let old = db.get_blueprint(&blueprint.id).unwrap().unwrap();
        assert_eq!(old.status, BlueprintStatus::Superseded);
    }

    #[test]
    fn test_cycle_state_machine() {
        let db = db();
        let (event, agent, blueprint) = seed(&db);

        let cycle = GenerationCycle::new(
            CycleType::Research,
            blueprint.id.clone(),
            event.id.clone(),
            agent.id.clone(),
        );
        db.insert_cycle(&cycle).unwrap();

        db.update_cycle_status(&cycle.id, CycleStatus::Processing, None)
            .unwrap();
        db.update_cycle_status(&cycle.id, CycleStatus::Completed, None)
            .unwrap();

        let loaded = db.get_cycle(&cycle.id).unwrap().unwrap();
        assert_eq!(loaded.status, CycleStatus::Completed);
        assert!(loaded.completed_at.is_some());

        // Completed cycles reject work transitions
        let err = db.update_cycle_status(&cycle.id, CycleStatus::Processing, None);
        assert!(err.is_err());

        // But accept supersession, idempotently
        db.update_cycle_status(&cycle.id, CycleStatus::Superseded, None)
            .unwrap();
        db.update_cycle_status(&cycle.id, CycleStatus::Superseded, None)
            .unwrap();
    }

    #[test]
    fn test_cycle_metadata_merge_preserves_keys() {
        let db = db();
        let (event, agent, blueprint) = seed(&db);
        let cycle = GenerationCycle::new(
            CycleType::Chunks,
            blueprint.id.clone(),
            event.id.clone(),
            agent.id.clone(),
        );
        db.insert_cycle(&cycle).unwrap();

        db.merge_cycle_metadata(&cycle.id, &serde_json::json!({"cost": 1.5}))
            .unwrap();
        db.merge_cycle_metadata(&cycle.id, &serde_json::json!({"embedded": 20}))
            .unwrap();

        let loaded = db.get_cycle(&cycle.id).unwrap().unwrap();
        assert_eq!(loaded.metadata["cost"], 1.5);
        assert_eq!(loaded.metadata["embedded"], 20);
    }

    #[test]
    fn test_supersession_hides_dependent_rows() {
        let db = db();
        let (event, agent, blueprint) = seed(&db);

        let old_cycle = GenerationCycle::new(
            CycleType::Research,
            blueprint.id.clone(),
            event.id.clone(),
            agent.id.clone(),
        );
        db.insert_cycle(&old_cycle).unwrap();

        let result = ResearchResult::new(
            blueprint.id.clone(),
            CycleRef::from(old_cycle.id.clone()),
            "festival history",
            "history of WOMAD",
            ResearchApi::WebSearch,
        );
        db.insert_research_result(&result).unwrap();

        // Legacy row with no cycle stays active throughout
        let legacy = ResearchResult::new(
            blueprint.id.clone(),
            CycleRef::Legacy,
            "legacy content",
            "old query",
            ResearchApi::Llm,
        );
        db.insert_research_result(&legacy).unwrap();

        assert_eq!(db.research_for_blueprint(&blueprint.id).unwrap().len(), 2);

        db.supersede_cycles(&event.id, CycleType::Research).unwrap();

        let active = db.research_for_blueprint(&blueprint.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "legacy content");
    }

    #[test]
    fn test_glossary_upsert_is_case_insensitive() {
        let db = db();
        let (event, _agent, _blueprint) = seed(&db);

        let first = GlossaryTerm::from_definition(
            event.id.clone(),
            CycleRef::Legacy,
            "WOMAD",
            TermDefinition {
                definition: "World of Music, Arts and Dance".to_string(),
                ..TermDefinition::default()
            },
            "llm",
        );
        db.upsert_glossary_term(&first).unwrap();

        let second = GlossaryTerm::from_definition(
            event.id.clone(),
            CycleRef::Legacy,
            "womad",
            TermDefinition {
                definition: "An international arts festival".to_string(),
                ..TermDefinition::default()
            },
            "qa",
        );
        db.upsert_glossary_term(&second).unwrap();

        let terms = db.glossary_for_event(&event.id).unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].definition, "An international arts festival");
        assert_eq!(terms[0].source, "qa");
    }

    #[test]
    fn test_context_items_ordered_by_rank() {
        let db = db();
        let (event, _agent, _blueprint) = seed(&db);

        for (rank, text) in [(2, "second"), (1, "first"), (3, "third")] {
            let mut item = ContextItem::new(
                event.id.clone(),
                CycleRef::Legacy,
                text,
                ChunkSource::WebSearch,
            );
            item.rank = rank;
            db.insert_context_item(&item).unwrap();
        }

        let items = db.context_items_for_event(&event.id).unwrap();
        let chunks: Vec<_> = items.iter().map(|i| i.chunk.as_str()).collect();
        assert_eq!(chunks, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_event_summary_counts_active_rows() {
        let db = db();
        let (event, _agent, blueprint) = seed(&db);

        let result = ResearchResult::new(
            blueprint.id.clone(),
            CycleRef::Legacy,
            "content",
            "query",
            ResearchApi::WebSearch,
        );
        db.insert_research_result(&result).unwrap();
        db.insert_document(&event.id, Some("press kit"), "lineup details", None)
            .unwrap();

        let summary = db.event_summary(&event.id).unwrap();
        assert_eq!(summary.research_results, 1);
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.context_items, 0);
    }
}
