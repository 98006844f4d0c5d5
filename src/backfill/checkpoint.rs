//! Durable resume points for keyset backfills

use crate::corpus::EntityId;
use crate::error::{LaanaError, Result};
use ahash::AHashMap;
use std::sync::{Mutex, MutexGuard};

/// Last watermark whose batch outcome is fully known, keyed by vector field
pub trait CheckpointStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<EntityId>>;

    fn save(&self, key: &str, watermark: EntityId) -> Result<()>;

    fn clear(&self, key: &str) -> Result<()>;
}

/// Process-local checkpoints, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    marks: Mutex<AHashMap<String, EntityId>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn marks(&self) -> Result<MutexGuard<'_, AHashMap<String, EntityId>>> {
        self.marks
            .lock()
            .map_err(|_| LaanaError::Store("checkpoint lock poisoned".to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, key: &str) -> Result<Option<EntityId>> {
        Ok(self.marks()?.get(key).copied())
    }

    fn save(&self, key: &str, watermark: EntityId) -> Result<()> {
        self.marks()?.insert(key.to_string(), watermark);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.marks()?.remove(key);
        Ok(())
    }
}
