//! SQLite pool and schema for the embedded corpus
//!
//! Holds the local corpus: documents, sentences, their per-tier vectors and
//! backfill checkpoints.

use crate::error::{LaanaError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) a database file
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LaanaError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| LaanaError::Config(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| LaanaError::Store(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            document_count: count("SELECT COUNT(*) FROM documents")?,
            sentence_count: count("SELECT COUNT(*) FROM sentences")?,
            documents_missing_small: count("SELECT COUNT(*) FROM documents WHERE vector_small IS NULL")?,
            documents_missing_large: count("SELECT COUNT(*) FROM documents WHERE vector_large IS NULL")?,
            sentences_missing_small: count("SELECT COUNT(*) FROM sentences WHERE vector_small IS NULL")?,
            sentences_missing_large: count("SELECT COUNT(*) FROM sentences WHERE vector_large IS NULL")?,
        })
    }
}

/// Database statistics
#[derive(Debug, serde::Serialize)]
pub struct DbStats {
    pub document_count: usize,
    pub sentence_count: usize,
    pub documents_missing_small: usize,
    pub documents_missing_large: usize,
    pub sentences_missing_small: usize,
    pub sentences_missing_large: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: corpus
    r#"
    CREATE TABLE documents (
        source_id INTEGER PRIMARY KEY,
        text TEXT NOT NULL,
        group_name TEXT,
        source_name TEXT,
        authors TEXT,
        date TEXT,
        quality_ratio REAL,
        vector_small BLOB,
        vector_large BLOB
    );

    CREATE INDEX idx_documents_group ON documents(group_name);
    CREATE INDEX idx_documents_date ON documents(date);

    CREATE TABLE sentences (
        sentence_id INTEGER PRIMARY KEY,
        source_id INTEGER NOT NULL,
        position INTEGER NOT NULL DEFAULT 0,
        text TEXT NOT NULL,
        quality_ratio REAL,
        vector_small BLOB,
        vector_large BLOB,
        FOREIGN KEY (source_id) REFERENCES documents(source_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_sentences_source ON sentences(source_id);
    "#,
    // Migration 2: backfill checkpoints
    r#"
    CREATE TABLE checkpoints (
        key TEXT PRIMARY KEY,
        watermark INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );
    "#,
];
