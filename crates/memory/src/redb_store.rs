//! Durable record table backed by [`redb`].
//!
//! One table, keyed by vector id:
//!
//! | Name              | Key          | Value                        |
//! |-------------------|--------------|------------------------------|
//! | `memory_records`  | `u64` id     | JSON-serialised [`MemoryRecord`] |
//!
//! Records are immutable once written, so a small LRU cache in front of the
//! table never needs invalidation except on [`RecordStore::clear_all`].
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info};

use crate::error::{MemoryError, Result};
use crate::schema::MemoryRecord;
use crate::store::RecordStore;

const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("memory_records");

/// Number of records held in the read cache.
const LRU_CAPACITY: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(n) => n,
    None => unreachable!(),
};

/// Snapshot of the read cache counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCacheStats {
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage 0.0 – 100.0.
    pub hit_rate_pct: f32,
}

pub struct RedbRecordStore {
    db: Database,
    path: PathBuf,
    cache: Mutex<LruCache<u64, MemoryRecord>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RedbRecordStore {
    /// Open or create the record table at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)?;

        // Ensure the table exists so read transactions never see TableDoesNotExist.
        {
            let tx = db.begin_write()?;
            tx.open_table(RECORDS_TABLE)?;
            tx.commit()?;
        }

        let store = Self {
            db,
            path,
            cache: Mutex::new(LruCache::new(LRU_CAPACITY)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        };
        info!(path = %store.path.display(), records = store.len()?, "memory record store opened");
        Ok(store)
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<u64, MemoryRecord>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for RedbRecordStore {
    fn put(&mut self, vector_id: u64, owner_id: &str, text: &str) -> Result<MemoryRecord> {
        let record = MemoryRecord::new(vector_id, owner_id, text);
        let bytes = serde_json::to_vec(&record)?;

        let tx = self.db.begin_write()?;
        let duplicate = {
            let tbl = tx.open_table(RECORDS_TABLE)?;
            let found = tbl.get(vector_id)?.is_some();
            found
        };
        if duplicate {
            tx.abort()?;
            return Err(MemoryError::DuplicateId(vector_id));
        }
        {
            let mut tbl = tx.open_table(RECORDS_TABLE)?;
            tbl.insert(vector_id, bytes.as_slice())?;
        }
        tx.commit()?;

        self.cache().put(vector_id, record.clone());
        Ok(record)
    }

    fn get_by_id(&self, vector_id: u64) -> Result<Option<MemoryRecord>> {
        if let Some(record) = self.cache().get(&vector_id) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(record.clone()));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(RECORDS_TABLE)?;
        let Some(value) = tbl.get(vector_id)? else {
            return Ok(None);
        };
        let record: MemoryRecord = serde_json::from_slice(value.value())?;
        self.cache().put(vector_id, record.clone());
        Ok(Some(record))
    }

    fn contains(&self, vector_id: u64) -> Result<bool> {
        if self.cache().contains(&vector_id) {
            return Ok(true);
        }
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(RECORDS_TABLE)?;
        let found = tbl.get(vector_id)?.is_some();
        Ok(found)
    }

    fn clear_all(&mut self) -> Result<()> {
        let removed = self.len()?;
        let tx = self.db.begin_write()?;
        tx.delete_table(RECORDS_TABLE)?;
        tx.open_table(RECORDS_TABLE)?;
        tx.commit()?;
        self.cache().clear();
        debug!(removed, path = %self.path.display(), "memory record table cleared");
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(RECORDS_TABLE)?;
        Ok(tbl.len()? as usize)
    }

    fn cache_stats(&self) -> Option<RecordCacheStats> {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        Some(RecordCacheStats {
            capacity: LRU_CAPACITY.get(),
            len: self.cache().len(),
            hits,
            misses,
            hit_rate_pct: if hits + misses == 0 {
                0.0
            } else {
                (hits as f32 / (hits + misses) as f32) * 100.0
            },
        })
    }
}
