//! Crash-safe merge of new records into the store file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use contentflow_shared::{ContentFlowError, ContentRecord, Result, RunConfig};

use crate::format::{ContentStore, STORE_HEADER};

/// What a successful merge left behind.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Copy of the store as it was before the merge.
    pub backup_path: PathBuf,
    /// SHA-256 of the store before the merge, hex encoded.
    pub previous_digest: String,
    /// SHA-256 of the store after the merge, hex encoded.
    pub new_digest: String,
    pub record_count: usize,
}

/// Writes records into one store file.
#[derive(Debug, Clone)]
pub struct StoreWriter {
    store_path: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl StoreWriter {
    /// `backup_dir` of `None` keeps backups next to the store file.
    pub fn new(store_path: impl Into<PathBuf>, backup_dir: Option<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            backup_dir,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.store_path.clone(), config.backup_dir.clone())
    }

    /// Merge one record into the store.
    ///
    /// 1. Copy the store to a timestamped backup
    /// 2. Parse it and insert the record after the header
    /// 3. Serialize and re-parse the result as a self-check
    /// 4. Write a temp file and rename it over the store
    ///
    /// A failed self-check restores the store from the backup and returns
    /// [`ContentFlowError::StoreParse`]. The backup is kept either way.
    #[instrument(skip_all, fields(key = %record.key, store = %self.store_path.display()))]
    pub fn merge(&self, record: &ContentRecord) -> Result<MergeOutcome> {
        self.merge_with(record, |_| {})
    }

    /// `merge` with a hook that sees the serialized text before the self-check.
    fn merge_with(
        &self,
        record: &ContentRecord,
        before_check: impl FnOnce(&mut String),
    ) -> Result<MergeOutcome> {
        let backup_path = self.backup()?;

        let previous = read_store_text(&self.store_path)?;
        let previous_digest = sha256_hex(previous.as_bytes());

        let mut store = ContentStore::parse(&previous)?;
        let expected = store.len() + 1;
        store.insert_front(record.clone())?;

        let mut serialized = store.serialize();
        before_check(&mut serialized);

        if let Err(err) = self_check(&serialized, expected, &record.key) {
            warn!(error = %err, backup = %backup_path.display(), "self-check failed, rolling back");
            self.restore(&backup_path, &previous_digest)?;
            return Err(err);
        }

        let temp = temp_path(&self.store_path);
        std::fs::write(&temp, &serialized).map_err(|e| ContentFlowError::io(&temp, e))?;
        if let Err(e) = std::fs::rename(&temp, &self.store_path) {
            let _ = std::fs::remove_file(&temp);
            return Err(ContentFlowError::io(&self.store_path, e));
        }

        let new_digest = sha256_hex(serialized.as_bytes());
        info!(
            records = expected,
            backup = %backup_path.display(),
            previous_sha256 = %previous_digest,
            new_sha256 = %new_digest,
            "record merged"
        );

        Ok(MergeOutcome {
            backup_path,
            previous_digest,
            new_digest,
            record_count: expected,
        })
    }

    /// Copy the store file to `<name>.<timestamp>.bak` in the backup directory.
    fn backup(&self) -> Result<PathBuf> {
        let dir = match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => parent_dir(&self.store_path),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ContentFlowError::io(&dir, e))?;

        let name = file_name(&self.store_path);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let mut candidate = dir.join(format!("{name}.{stamp}.bak"));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{name}.{stamp}.{n}.bak"));
            n += 1;
        }

        std::fs::copy(&self.store_path, &candidate)
            .map_err(|e| ContentFlowError::io(&self.store_path, e))?;
        debug!(backup = %candidate.display(), "store backed up");
        Ok(candidate)
    }

    /// Put the backup back if the live file no longer matches it.
    fn restore(&self, backup_path: &Path, previous_digest: &str) -> Result<()> {
        let current = std::fs::read(&self.store_path)
            .map_err(|e| ContentFlowError::io(&self.store_path, e))?;
        if sha256_hex(&current) == previous_digest {
            debug!("store file untouched, nothing to restore");
            return Ok(());
        }
        std::fs::copy(backup_path, &self.store_path)
            .map_err(|e| ContentFlowError::io(&self.store_path, e))?;
        info!(backup = %backup_path.display(), "store restored from backup");
        Ok(())
    }
}

fn self_check(serialized: &str, expected: usize, key: &str) -> Result<()> {
    let reparsed = ContentStore::parse(serialized).map_err(|e| match e {
        ContentFlowError::StoreParse { message } => {
            ContentFlowError::parse(format!("serialized store failed to re-parse: {message}"))
        }
        other => other,
    })?;
    if reparsed.len() != expected {
        return Err(ContentFlowError::parse(format!(
            "serialized store has {} records, expected {expected}",
            reparsed.len()
        )));
    }
    if reparsed.keys().next() != Some(key) {
        return Err(ContentFlowError::parse(format!(
            "record `{key}` is not first in the serialized store"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Read and parse the store at `path`.
pub fn load_store(path: &Path) -> Result<ContentStore> {
    ContentStore::parse(&read_store_text(path)?)
}

/// Create an empty store at `path`. Returns `false` if a file already exists.
pub fn init_store(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir).map_err(|e| ContentFlowError::io(&dir, e))?;
    std::fs::write(path, format!("{STORE_HEADER}\n")).map_err(|e| ContentFlowError::io(path, e))?;
    info!(path = %path.display(), "created empty content store");
    Ok(true)
}

fn read_store_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ContentFlowError::io(path, e))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string())
}

fn temp_path(path: &Path) -> PathBuf {
    parent_dir(path).join(format!(".{}.tmp", file_name(path)))
}
