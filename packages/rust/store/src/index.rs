//! Duplicate Guard: the set of record keys already present in the store.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use contentflow_shared::Result;

use crate::format::ContentStore;
use crate::writer::load_store;

/// Record keys known to the store, built once per run.
#[derive(Debug, Clone, Default)]
pub struct StoreIndex {
    keys: HashSet<String>,
}

impl StoreIndex {
    /// Parse the store at `path` and index its keys.
    pub fn load(path: &Path) -> Result<Self> {
        let store = load_store(path)?;
        let index = Self::from_store(&store);
        debug!(path = %path.display(), keys = index.len(), "store index built");
        Ok(index)
    }

    pub fn from_store(store: &ContentStore) -> Self {
        Self {
            keys: store.keys().map(str::to_string).collect(),
        }
    }

    pub fn is_duplicate(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Record a key written during the run. Returns `false` if it was already known.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
