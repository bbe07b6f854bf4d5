//! Long-term semantic memory: the vector index plus the record table that
//! gives each vector its text.
//!
//! Writers take the exclusive lock for id assignment, both writes and the
//! index persistence attempt, so ids are gap-free under concurrent callers.
//! Searches share the lock and never observe a half-finished insert.
//!
//! On open the persisted index is loaded and checked against the record
//! table.  A missing, corrupt or foreign-dimension index, or one whose size
//! disagrees with the record count, resets **both** to empty.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use recall_config::MemoryConfig;

use crate::error::{MemoryError, Result};
use crate::redb_store::{RecordCacheStats, RedbRecordStore};
use crate::schema::MemoryMatch;
use crate::store::{InMemoryRecordStore, RecordStore};
use crate::vector_index::{IndexLoadError, VectorIndex, check_vector};

/// Settings for one [`SemanticMemory`] instance.
#[derive(Debug, Clone)]
pub struct SemanticSettings {
    pub dim: usize,
    /// Where the index is persisted.  `None` keeps it in memory only.
    pub index_path: Option<PathBuf>,
    pub persist_retries: u32,
    pub max_distance: Option<f32>,
}

impl SemanticSettings {
    pub fn volatile(dim: usize) -> Self {
        Self {
            dim,
            index_path: None,
            persist_retries: 0,
            max_distance: None,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            dim: config.embedding_dim,
            index_path: Some(config.index_path()),
            persist_retries: config.persist_retries,
            max_distance: config.max_distance,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticStats {
    pub dim: usize,
    pub vectors: usize,
    pub records: usize,
    /// Vectors appended whose record write then failed.
    pub orphaned_vectors: u64,
    /// Search hits dropped because no record resolved for the id.
    pub orphan_records_skipped: u64,
    /// Index writes abandoned after exhausting retries.
    pub persist_failures: u64,
    /// Read-cache counters of the record store, when it caches.
    pub record_cache: Option<RecordCacheStats>,
}

struct SemanticState {
    index: VectorIndex,
    records: Box<dyn RecordStore>,
}

#[derive(Default)]
struct Counters {
    orphaned_vectors: AtomicU64,
    orphan_records_skipped: AtomicU64,
    persist_failures: AtomicU64,
}

pub struct SemanticMemory {
    state: RwLock<SemanticState>,
    settings: SemanticSettings,
    counters: Counters,
}

impl SemanticMemory {
    /// Open the durable memory described by `config`: the redb record table
    /// and the index file next to it.
    pub async fn open(config: &MemoryConfig) -> Result<Self> {
        let records = RedbRecordStore::open(config.records_path())?;
        Self::with_store(SemanticSettings::from_config(config), Box::new(records)).await
    }

    /// Volatile memory with no files behind it.
    pub fn in_memory(dim: usize) -> Result<Self> {
        check_settings(&SemanticSettings::volatile(dim))?;
        Ok(Self {
            state: RwLock::new(SemanticState {
                index: VectorIndex::new(dim),
                records: Box::new(InMemoryRecordStore::new()),
            }),
            settings: SemanticSettings::volatile(dim),
            counters: Counters::default(),
        })
    }

    /// Pair `records` with the persisted index (if any), resetting both when
    /// they cannot be trusted together.
    pub async fn with_store(
        settings: SemanticSettings,
        mut records: Box<dyn RecordStore>,
    ) -> Result<Self> {
        check_settings(&settings)?;

        let (index, reset) = restore(&settings, records.as_mut())?;
        let memory = Self {
            state: RwLock::new(SemanticState { index, records }),
            settings,
            counters: Counters::default(),
        };

        if reset {
            let state = memory.state.read().await;
            memory.persist(&state.index).await;
        }
        Ok(memory)
    }

    pub fn dim(&self) -> usize {
        self.settings.dim
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.settings.index_path.as_deref()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        check_vector(vector, self.settings.dim)
    }

    /// Store `text` under the next vector id and return that id.
    ///
    /// The vector is appended before the record is written.  If the record
    /// write fails the vector stays in the index without text (an orphan);
    /// searches skip it and the next start's consistency check resets the
    /// store.
    pub async fn add_memory(&self, owner_id: &str, text: &str, vector: &[f32]) -> Result<u64> {
        self.check_vector(vector)?;

        let mut state = self.state.write().await;
        let vector_id = state.index.add(vector)?;
        if let Err(err) = state.records.put(vector_id, owner_id, text) {
            self.counters.orphaned_vectors.fetch_add(1, Ordering::Relaxed);
            error!(vector_id, owner_id, %err, "record write failed after index append; vector orphaned");
            return Err(err);
        }

        self.persist(&state.index).await;
        debug!(vector_id, owner_id, text_len = text.len(), "semantic memory added");
        Ok(vector_id)
    }

    /// Up to `k` stored memories closest to `query`, nearest first.
    pub async fn search_memory(&self, query: &[f32], k: usize) -> Result<Vec<MemoryMatch>> {
        self.check_vector(query)?;

        let state = self.state.read().await;
        let hits = state.index.search(query, k)?;
        let mut matches = Vec::with_capacity(hits.len());
        for (vector_id, distance) in hits {
            if self.settings.max_distance.is_some_and(|max| distance > max) {
                break;
            }
            match state.records.get_by_id(vector_id) {
                Ok(Some(record)) => matches.push(MemoryMatch {
                    vector_id,
                    text: record.text,
                    distance,
                }),
                Ok(None) => {
                    self.counters.orphan_records_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(vector_id, "indexed vector has no memory record; skipping");
                }
                Err(err) => {
                    self.counters.orphan_records_skipped.fetch_add(1, Ordering::Relaxed);
                    warn!(vector_id, %err, "memory record unreadable; skipping");
                }
            }
        }
        debug!(k, returned = matches.len(), "semantic memory searched");
        Ok(matches)
    }

    /// Drop every vector and record, restarting ids at zero.
    pub async fn wipe(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.index.len();
        state.records.clear_all()?;
        state.index = VectorIndex::new(self.settings.dim);
        self.persist(&state.index).await;
        info!(removed, "semantic memory wiped");
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> Result<SemanticStats> {
        let state = self.state.read().await;
        Ok(SemanticStats {
            dim: self.settings.dim,
            vectors: state.index.len(),
            records: state.records.len()?,
            orphaned_vectors: self.counters.orphaned_vectors.load(Ordering::Relaxed),
            orphan_records_skipped: self.counters.orphan_records_skipped.load(Ordering::Relaxed),
            persist_failures: self.counters.persist_failures.load(Ordering::Relaxed),
            record_cache: state.records.cache_stats(),
        })
    }

    /// Write the index, retrying a bounded number of times.  Failures are
    /// logged and counted; in-memory state stays authoritative.
    async fn persist(&self, index: &VectorIndex) {
        let Some(path) = self.settings.index_path.as_deref() else {
            return;
        };
        let attempts = self.settings.persist_retries + 1;
        for attempt in 1..=attempts {
            match index.save(path).await {
                Ok(()) => return,
                Err(err) => warn!(
                    attempt,
                    attempts,
                    %err,
                    path = %path.display(),
                    "failed to persist vector index"
                ),
            }
        }
        self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
        error!(
            vectors = index.len(),
            path = %path.display(),
            "vector index not persisted; on-disk state is stale until the next successful write"
        );
    }
}

fn check_settings(settings: &SemanticSettings) -> Result<()> {
    if settings.dim == 0 {
        return Err(MemoryError::InvalidConfig(
            "embedding dimension must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Load the persisted index and decide whether it can be paired with
/// `records`.  Returns the index to use and whether a reset happened.
fn restore(settings: &SemanticSettings, records: &mut dyn RecordStore) -> Result<(VectorIndex, bool)> {
    let loaded = match settings.index_path.as_deref() {
        Some(path) => VectorIndex::load(path, settings.dim),
        None => Err(IndexLoadError::Missing(PathBuf::new())),
    };

    let reason = match loaded {
        Ok(index) => match consistency_gap(&index, records)? {
            None => {
                info!(vectors = index.len(), dim = settings.dim, "vector index loaded");
                return Ok((index, false));
            }
            Some(gap) => gap,
        },
        Err(IndexLoadError::Missing(_)) if records.is_empty()? => {
            info!(dim = settings.dim, "no vector index found; starting empty");
            return Ok((VectorIndex::new(settings.dim), false));
        }
        Err(err) => err.to_string(),
    };

    let dropped = records.len()?;
    warn!(%reason, dropped_records = dropped, "resetting vector index and memory records");
    records.clear_all()?;
    Ok((VectorIndex::new(settings.dim), true))
}

/// Describe how `index` and `records` disagree, if they do.
fn consistency_gap(index: &VectorIndex, records: &dyn RecordStore) -> Result<Option<String>> {
    let record_count = records.len()?;
    if record_count != index.len() {
        return Ok(Some(format!(
            "index holds {} vectors but {} records exist",
            index.len(),
            record_count
        )));
    }
    for vector_id in 0..index.len() as u64 {
        if !records.contains(vector_id)? {
            return Ok(Some(format!("no record for vector id {vector_id}")));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemoryRecord;
    use futures::future::join_all;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn durable_settings(dir: &TempDir, dim: usize) -> SemanticSettings {
        SemanticSettings {
            dim,
            index_path: Some(dir.path().join("index.bin")),
            persist_retries: 0,
            max_distance: None,
        }
    }

    async fn open_durable(dir: &TempDir, dim: usize) -> SemanticMemory {
        let records = RedbRecordStore::open(dir.path().join("records.redb")).unwrap();
        SemanticMemory::with_store(durable_settings(dir, dim), Box::new(records))
            .await
            .unwrap()
    }

    /// Record store whose next `put` can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryRecordStore,
        fail_next: bool,
    }

    impl RecordStore for FlakyStore {
        fn put(&mut self, vector_id: u64, owner_id: &str, text: &str) -> Result<MemoryRecord> {
            if std::mem::take(&mut self.fail_next) {
                return Err(MemoryError::Io(std::io::Error::other("disk full")));
            }
            self.inner.put(vector_id, owner_id, text)
        }
        fn get_by_id(&self, vector_id: u64) -> Result<Option<MemoryRecord>> {
            self.inner.get_by_id(vector_id)
        }
        fn clear_all(&mut self) -> Result<()> {
            self.inner.clear_all()
        }
        fn len(&self) -> Result<usize> {
            self.inner.len()
        }
    }

    #[tokio::test]
    async fn recalls_nearest_with_squared_l2_distances() {
        let memory = SemanticMemory::in_memory(4).unwrap();
        assert_eq!(memory.add_memory("u", "east", &[1.0, 0.0, 0.0, 0.0]).await.unwrap(), 0);
        assert_eq!(memory.add_memory("u", "north", &[0.0, 1.0, 0.0, 0.0]).await.unwrap(), 1);

        let matches = memory.search_memory(&[0.9, 0.1, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].vector_id, 0);
        assert_eq!(matches[0].text, "east");
        assert!((matches[0].distance - 0.02).abs() < 1e-6);
        assert_eq!(matches[1].vector_id, 1);
        assert!((matches[1].distance - 1.62).abs() < 1e-6);
    }

    #[tokio::test]
    async fn added_vector_is_its_own_top_match() {
        let memory = SemanticMemory::in_memory(3).unwrap();
        memory.add_memory("u", "a", &[0.2, 0.4, 0.6]).await.unwrap();
        let id = memory.add_memory("u", "b", &[-1.0, 3.0, 0.5]).await.unwrap();
        memory.add_memory("u", "c", &[5.0, 5.0, 5.0]).await.unwrap();

        let matches = memory.search_memory(&[-1.0, 3.0, 0.5], 1).await.unwrap();
        assert_eq!(matches[0].vector_id, id);
        assert_eq!(matches[0].distance, 0.0);
    }

    #[tokio::test]
    async fn search_on_empty_memory_returns_nothing() {
        let memory = SemanticMemory::in_memory(2).unwrap();
        assert!(memory.search_memory(&[1.0, 1.0], 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn k_beyond_count_returns_all_sorted_with_id_tiebreak() {
        let memory = SemanticMemory::in_memory(2).unwrap();
        memory.add_memory("u", "far", &[3.0, 0.0]).await.unwrap();
        memory.add_memory("u", "near-a", &[1.0, 0.0]).await.unwrap();
        memory.add_memory("u", "near-b", &[0.0, 1.0]).await.unwrap();

        let matches = memory.search_memory(&[0.0, 0.0], 10).await.unwrap();
        let ids: Vec<u64> = matches.iter().map(|m| m.vector_id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn short_vector_is_rejected_without_side_effects() {
        let memory = SemanticMemory::in_memory(4).unwrap();
        memory.add_memory("u", "ok", &[1.0, 0.0, 0.0, 0.0]).await.unwrap();

        let err = memory.add_memory("u", "bad", &[1.0, 0.0, 0.0]).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch { expected: 4, actual: 3 }
        ));
        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.records, 1);

        let err = memory.search_memory(&[1.0; 5], 1).await.unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn concurrent_writers_get_gap_free_ids() {
        let memory = Arc::new(SemanticMemory::in_memory(2).unwrap());
        let writes = (0..32).map(|i| {
            let memory = Arc::clone(&memory);
            async move {
                memory
                    .add_memory("u", &format!("note {i}"), &[i as f32, 1.0])
                    .await
                    .unwrap()
            }
        });
        let mut ids = join_all(writes).await;
        ids.sort_unstable();
        assert_eq!(ids, (0..32).collect::<Vec<u64>>());
        assert_eq!(memory.stats().await.unwrap().records, 32);
    }

    #[tokio::test]
    async fn spawned_writers_get_gap_free_ids() {
        let memory = Arc::new(SemanticMemory::in_memory(2).unwrap());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let memory = Arc::clone(&memory);
                tokio::spawn(async move {
                    memory.add_memory("u", "x", &[i as f32, 0.0]).await.unwrap()
                })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn restart_reproduces_identical_matches() {
        let dir = TempDir::new().unwrap();
        let query = [0.5, 0.25, -0.5];
        let before = {
            let memory = open_durable(&dir, 3).await;
            memory.add_memory("u", "one", &[0.0, 0.0, 1.0]).await.unwrap();
            memory.add_memory("u", "two", &[0.5, 0.5, -0.5]).await.unwrap();
            memory.add_memory("u", "three", &[1.0, 0.0, 0.0]).await.unwrap();
            memory.search_memory(&query, 3).await.unwrap()
        };

        let memory = open_durable(&dir, 3).await;
        assert_eq!(memory.len().await, 3);
        assert_eq!(memory.search_memory(&query, 3).await.unwrap(), before);
        assert_eq!(memory.add_memory("u", "four", &[0.0; 3]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reopening_with_other_dimension_resets_both_stores() {
        let dir = TempDir::new().unwrap();
        {
            let memory = open_durable(&dir, 3).await;
            memory.add_memory("u", "old", &[1.0, 2.0, 3.0]).await.unwrap();
        }
        let memory = open_durable(&dir, 4).await;
        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.records, 0);
        assert_eq!(memory.add_memory("u", "new", &[0.0; 4]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_index_clears_stale_records() {
        let dir = TempDir::new().unwrap();
        {
            let mut records = RedbRecordStore::open(dir.path().join("records.redb")).unwrap();
            records.put(0, "u", "stale").unwrap();
        }
        let memory = open_durable(&dir, 2).await;
        assert_eq!(memory.stats().await.unwrap().records, 0);
        assert!(dir.path().join("index.bin").exists());
    }

    #[tokio::test]
    async fn size_mismatch_on_load_resets_both_stores() {
        let dir = TempDir::new().unwrap();
        let mut index = VectorIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.save(dir.path().join("index.bin")).await.unwrap();
        {
            let mut records = RedbRecordStore::open(dir.path().join("records.redb")).unwrap();
            records.put(0, "u", "only one").unwrap();
        }

        let memory = open_durable(&dir, 2).await;
        let stats = memory.stats().await.unwrap();
        assert_eq!((stats.vectors, stats.records), (0, 0));
    }

    #[tokio::test]
    async fn corrupt_index_file_resets_both_stores() {
        let dir = TempDir::new().unwrap();
        {
            let memory = open_durable(&dir, 2).await;
            memory.add_memory("u", "x", &[1.0, 1.0]).await.unwrap();
        }
        std::fs::write(dir.path().join("index.bin"), b"garbage").unwrap();
        let memory = open_durable(&dir, 2).await;
        assert!(memory.is_empty().await);
        assert_eq!(memory.stats().await.unwrap().records, 0);
    }

    #[tokio::test]
    async fn orphaned_vector_is_skipped_by_search() {
        let store = FlakyStore {
            fail_next: true,
            ..Default::default()
        };
        let memory = SemanticMemory::with_store(SemanticSettings::volatile(2), Box::new(store))
            .await
            .unwrap();

        assert!(memory.add_memory("u", "lost", &[0.0, 0.0]).await.is_err());
        assert_eq!(memory.add_memory("u", "kept", &[1.0, 0.0]).await.unwrap(), 1);

        let matches = memory.search_memory(&[0.0, 0.0], 5).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "kept");

        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.orphaned_vectors, 1);
        assert_eq!(stats.orphan_records_skipped, 1);
        assert_eq!((stats.vectors, stats.records), (2, 1));
    }

    #[tokio::test]
    async fn persist_failure_does_not_fail_the_add() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let settings = SemanticSettings {
            dim: 2,
            index_path: Some(blocker.join("index.bin")),
            persist_retries: 1,
            max_distance: None,
        };
        let memory = SemanticMemory::with_store(settings, Box::new(InMemoryRecordStore::new()))
            .await
            .unwrap();
        let startup_failures = memory.stats().await.unwrap().persist_failures;

        let id = memory.add_memory("u", "still here", &[1.0, 2.0]).await.unwrap();
        assert_eq!(id, 0);
        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.persist_failures, startup_failures + 1);
        assert_eq!(memory.search_memory(&[1.0, 2.0], 1).await.unwrap()[0].text, "still here");
    }

    #[tokio::test]
    async fn max_distance_drops_far_matches() {
        let mut settings = SemanticSettings::volatile(2);
        settings.max_distance = Some(0.5);
        let memory = SemanticMemory::with_store(settings, Box::new(InMemoryRecordStore::new()))
            .await
            .unwrap();
        memory.add_memory("u", "close", &[0.1, 0.0]).await.unwrap();
        memory.add_memory("u", "far", &[2.0, 0.0]).await.unwrap();

        let matches = memory.search_memory(&[0.0, 0.0], 3).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "close");
    }

    #[tokio::test]
    async fn wipe_restarts_ids_at_zero() {
        let dir = TempDir::new().unwrap();
        let memory = open_durable(&dir, 2).await;
        memory.add_memory("u", "a", &[1.0, 0.0]).await.unwrap();
        memory.add_memory("u", "b", &[0.0, 1.0]).await.unwrap();
        assert_eq!(memory.wipe().await.unwrap(), 2);
        assert_eq!(memory.add_memory("u", "c", &[1.0, 1.0]).await.unwrap(), 0);
        drop(memory);

        let reopened = open_durable(&dir, 2).await;
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn stats_expose_record_cache_counters() {
        let dir = TempDir::new().unwrap();
        let memory = open_durable(&dir, 2).await;
        memory.add_memory("u", "a", &[1.0, 0.0]).await.unwrap();
        memory.search_memory(&[1.0, 0.0], 1).await.unwrap();

        let cache = memory.stats().await.unwrap().record_cache.unwrap();
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 0);
        assert_eq!(cache.len, 1);

        let volatile = SemanticMemory::in_memory(2).unwrap();
        assert!(volatile.stats().await.unwrap().record_cache.is_none());
    }

    #[tokio::test]
    async fn zero_dimension_is_rejected() {
        let err = SemanticMemory::with_store(
            SemanticSettings::volatile(0),
            Box::new(InMemoryRecordStore::new()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = SemanticMemory::in_memory(0).err().unwrap();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn non_finite_vectors_are_rejected_without_side_effects() {
        let memory = SemanticMemory::in_memory(2).unwrap();
        memory.add_memory("u", "ok", &[1.0, 0.0]).await.unwrap();

        for bad in [[f32::NAN, 0.0], [0.0, f32::INFINITY], [f32::NEG_INFINITY, 1.0]] {
            let err = memory.add_memory("u", "bad", &bad).await.unwrap_err();
            assert!(matches!(err, MemoryError::NonFiniteComponent { .. }));
        }
        let stats = memory.stats().await.unwrap();
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.orphaned_vectors, 0);

        let err = memory.search_memory(&[f32::INFINITY, 0.0], 1).await.unwrap_err();
        assert!(matches!(err, MemoryError::NonFiniteComponent { index: 0 }));
    }
}
