//! Checkpoint persistence.
//!
//! [`CheckpointStore`] is the port the run coordinator reads and writes the
//! "last processed" timestamp through. Two backends:
//! - [`Storage`]: libSQL database file, versioned migrations, optional read-only mode
//! - [`MemoryCheckpointStore`]: in-process map for tests

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentflow_shared::{ContentFlowError, Result};
use libsql::{Connection, Database, params};

pub use memory::MemoryCheckpointStore;

/// Load/save of per-entity checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored checkpoint, or `None` if this entity has never completed a run.
    async fn load(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>>;

    async fn save(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Checkpoint database handle wrapping libSQL.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContentFlowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ContentFlowError::Storage(format!(
                "checkpoint database {} does not exist",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ContentFlowError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ContentFlowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Every stored checkpoint as `(entity_id, last_check_date)`, ordered by entity.
    pub async fn list_checkpoints(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id, last_check_date FROM checkpoints ORDER BY entity_id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let entity: String = row.get(0).map_err(storage_err)?;
            let raw: String = row.get(1).map_err(storage_err)?;
            results.push((entity, parse_stored(&raw)?));
        }
        Ok(results)
    }
}

#[async_trait]
impl CheckpointStore for Storage {
    async fn load(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_check_date FROM checkpoints WHERE entity_id = ?1",
                params![entity_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let raw: String = row.get(0).map_err(storage_err)?;
                parse_stored(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        let value = at.to_rfc3339();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO checkpoints (entity_id, last_check_date, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     last_check_date = excluded.last_check_date,
                     updated_at = excluded.updated_at",
                params![entity_id, value.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(entity_id, at = %value, "checkpoint saved");
        Ok(())
    }
}

fn parse_stored(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| ContentFlowError::Storage(format!("corrupt checkpoint value `{raw}`: {e}")))
}

fn storage_err(e: libsql::Error) -> ContentFlowError {
    ContentFlowError::Storage(e.to_string())
}
