//! Checkpoint Manager: the discovery lower bound for one ingestion entity.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use contentflow_shared::Result;
use contentflow_storage::CheckpointStore;

/// Binds a [`CheckpointStore`] to one entity id.
pub struct CheckpointManager<'a> {
    store: &'a dyn CheckpointStore,
    entity_id: String,
    initial_lookback: Duration,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(
        store: &'a dyn CheckpointStore,
        entity_id: impl Into<String>,
        initial_lookback_days: u32,
    ) -> Self {
        Self {
            store,
            entity_id: entity_id.into(),
            initial_lookback: Duration::days(i64::from(initial_lookback_days)),
        }
    }

    /// The stored checkpoint, or `now - initial_lookback_days` if none exists yet.
    pub async fn get(&self) -> Result<DateTime<Utc>> {
        match self.stored().await? {
            Some(at) => {
                debug!(entity = %self.entity_id, %at, "checkpoint loaded");
                Ok(at)
            }
            None => {
                let at = Utc::now() - self.initial_lookback;
                info!(entity = %self.entity_id, %at, "no checkpoint yet, using lookback window");
                Ok(at)
            }
        }
    }

    /// The stored checkpoint without the lookback fallback.
    pub async fn stored(&self) -> Result<Option<DateTime<Utc>>> {
        self.store.load(&self.entity_id).await
    }

    pub async fn set(&self, at: DateTime<Utc>) -> Result<()> {
        self.store.save(&self.entity_id, at).await?;
        info!(entity = %self.entity_id, %at, "checkpoint advanced");
        Ok(())
    }
}
