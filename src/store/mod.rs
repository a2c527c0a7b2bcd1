//! Persistence layer: pooled SQLite storage with cycle-aware reads.

pub mod database;

pub use database::{Database, EventRecord, EventSummary, PoolConfig, SharedDatabase};
