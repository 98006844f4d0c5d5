use super::Database;
use crate::backfill::CheckpointStore;
use crate::corpus::EntityId;
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// Backfill checkpoints kept next to the corpus
pub struct SqliteCheckpointStore {
    db: Arc<Database>,
}

impl SqliteCheckpointStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, key: &str) -> Result<Option<EntityId>> {
        let conn = self.db.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT watermark FROM checkpoints WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn save(&self, key: &str, watermark: EntityId) -> Result<()> {
        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO checkpoints (key, watermark, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET watermark = excluded.watermark, updated_at = excluded.updated_at",
            params![key, watermark, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let conn = self.db.get_conn()?;
        conn.execute("DELETE FROM checkpoints WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("corpus.db");
        {
            let store = SqliteCheckpointStore::new(Arc::new(Database::new(&path).unwrap()));
            assert_eq!(store.load("document.text_vector").unwrap(), None);
            store.save("document.text_vector", 40).unwrap();
            store.save("document.text_vector", 80).unwrap();
        }
        let store = SqliteCheckpointStore::new(Arc::new(Database::new(&path).unwrap()));
        assert_eq!(store.load("document.text_vector").unwrap(), Some(80));
        store.clear("document.text_vector").unwrap();
        assert_eq!(store.load("document.text_vector").unwrap(), None);
    }
}
