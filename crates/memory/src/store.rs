use std::collections::BTreeMap;

use crate::error::{MemoryError, Result};
use crate::redb_store::RecordCacheStats;
use crate::schema::MemoryRecord;

/// Maps vector ids to the owner and text they were embedded from.
///
/// Writers hold `&mut self`; the semantic memory serialises them behind its
/// write lock, so implementations only need interior mutability for caches.
pub trait RecordStore: Send + Sync {
    /// Insert a new record.  Fails with [`MemoryError::DuplicateId`] when
    /// `vector_id` is already present.
    fn put(&mut self, vector_id: u64, owner_id: &str, text: &str) -> Result<MemoryRecord>;

    fn get_by_id(&self, vector_id: u64) -> Result<Option<MemoryRecord>>;

    fn contains(&self, vector_id: u64) -> Result<bool> {
        Ok(self.get_by_id(vector_id)?.is_some())
    }

    /// Remove every record.  Only called together with recreating the index.
    fn clear_all(&mut self) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read-cache counters, for stores that cache.
    fn cache_stats(&self) -> Option<RecordCacheStats> {
        None
    }
}

/// Volatile record store for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: BTreeMap<u64, MemoryRecord>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn put(&mut self, vector_id: u64, owner_id: &str, text: &str) -> Result<MemoryRecord> {
        if self.records.contains_key(&vector_id) {
            return Err(MemoryError::DuplicateId(vector_id));
        }
        let record = MemoryRecord::new(vector_id, owner_id, text);
        self.records.insert(vector_id, record.clone());
        Ok(record)
    }

    fn get_by_id(&self, vector_id: u64) -> Result<Option<MemoryRecord>> {
        Ok(self.records.get(&vector_id).cloned())
    }

    fn contains(&self, vector_id: u64) -> Result<bool> {
        Ok(self.records.contains_key(&vector_id))
    }

    fn clear_all(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
