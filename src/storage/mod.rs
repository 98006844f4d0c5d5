//! Storage layer for Laana
//!
//! The local SQLite corpus and the client for the document-store backend.

mod checkpoints;
mod corpus;
pub mod database;
mod elastic;
mod import;

use crate::backfill::CheckpointStore;
use crate::config::StorageConfig;
use crate::error::Result;
use std::sync::Arc;

pub use checkpoints::SqliteCheckpointStore;
pub use corpus::SqliteCorpus;
pub use database::{Database, DbPool, DbStats};
pub use elastic::{bulk_body, parse_bulk_response, ElasticStore};
pub use import::{import_jsonl, ImportRecord, ImportSentence, ImportStats};

/// The local corpus with its checkpoints, sharing one pool
pub struct LocalStore {
    pub database: Arc<Database>,
    pub corpus: Arc<SqliteCorpus>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
}

impl LocalStore {
    /// Open (creating and migrating if needed) the configured database
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let database = Arc::new(Database::new(&config.database_path()?)?);
        Ok(Self {
            corpus: Arc::new(SqliteCorpus::new(database.clone())),
            checkpoints: Arc::new(SqliteCheckpointStore::new(database.clone())),
            database,
        })
    }

    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        self.checkpoints.clone()
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.database.stats()
    }
}
