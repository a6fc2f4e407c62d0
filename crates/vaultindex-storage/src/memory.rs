//! In-memory storage backend.
//!
//! Holds projection rows and checkpoints in RAM. Useful for tests and for
//! running the indexer without a database; all data is lost on exit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use vaultindex_core::checkpoint::{Checkpoint, CheckpointStore};
use vaultindex_core::error::IndexerError;
use vaultindex_core::projector::ProjectionStore;
use vaultindex_core::records::{merge_row, Row, Table, KEY_COLUMN};
use vaultindex_core::types::Address;

type Key = (Table, Address);

/// In-memory projection and checkpoint store.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<BTreeMap<Key, Row>>,
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    rejected: Mutex<HashSet<Key>>,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `(table, key)` fail, as a rejecting store would.
    pub fn reject_writes_for(&self, table: Table, key: &Address) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((table, key.clone()));
    }

    /// Insert a row directly, bypassing write accounting (fixtures).
    pub fn seed(&self, table: Table, key: &Address, row: Row) {
        let mut row = row;
        row.insert(KEY_COLUMN.into(), key.as_str().into());
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((table, key.clone()), row);
    }

    /// All rows of `table` ordered by key.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((t, _), _)| *t == table)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Number of upsert/update calls received, including rejected ones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self, table: Table, key: &Address) -> Result<(), IndexerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        if rejected.contains(&(table, key.clone())) {
            return Err(IndexerError::ProjectionWrite {
                table: table.name().to_string(),
                owner: key.to_string(),
                reason: "write rejected".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for InMemoryStore {
    async fn upsert(&self, table: Table, key: &Address, row: Row) -> Result<(), IndexerError> {
        self.check_writable(table, key)?;
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = rows.entry((table, key.clone())).or_default();
        merge_row(entry, &row);
        entry.insert(KEY_COLUMN.into(), key.as_str().into());
        Ok(())
    }

    async fn update(&self, table: Table, key: &Address, patch: Row) -> Result<u64, IndexerError> {
        self.check_writable(table, key)?;
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        match rows.get_mut(&(table, key.clone())) {
            Some(row) => {
                merge_row(row, &patch);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn get(&self, table: Table, key: &Address) -> Result<Option<Row>, IndexerError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(&(table, key.clone())).cloned())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let key = format!("{}:{}", checkpoint.chain_id, checkpoint.indexer_id);
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }
}
