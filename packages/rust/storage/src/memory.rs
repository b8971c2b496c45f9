//! In-process checkpoint store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentflow_shared::{ContentFlowError, Result};

use crate::CheckpointStore;

/// Checkpoints kept in a map; can be told to fail saves.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, DateTime<Utc>>>,
    fail_saves: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `entity_id` already checkpointed at `at`.
    pub fn with_checkpoint(entity_id: &str, at: DateTime<Utc>) -> Self {
        let store = Self::default();
        store.lock().insert(entity_id.to_string(), at);
        store
    }

    /// Make every following `save` fail with a storage error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Current value without going through the async port.
    pub fn get(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(entity_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get(entity_id))
    }

    async fn save(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ContentFlowError::Storage(
                "checkpoint backend unavailable".into(),
            ));
        }
        self.lock().insert(entity_id.to_string(), at);
        Ok(())
    }
}
