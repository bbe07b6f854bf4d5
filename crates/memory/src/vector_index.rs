//! Exact nearest-neighbour index over fixed-length `f32` vectors.
//!
//! Vectors are stored back to back in a single flat buffer; the id of a
//! vector is its insertion position, so ids are dense from 0 and never reused.
//! Search is a full scan by squared Euclidean (L2) distance.
//!
//! # On-disk format
//!
//! One file holding a bincode-encoded `IndexFile`:
//!
//! | Field     | Meaning                                   |
//! |-----------|-------------------------------------------|
//! | `magic`   | `b"RVIX"`                                 |
//! | `version` | [`FORMAT_VERSION`]                        |
//! | `dim`     | vector length the index was built with    |
//! | `vectors` | `len * dim` components, insertion order   |
//!
//! Writes go to a `.tmp` sibling which is then renamed over the live file.
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use tokio::io::AsyncWriteExt;

use crate::error::{MemoryError, Result};

const MAGIC: [u8; 4] = *b"RVIX";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Encode, Decode)]
struct IndexFile {
    magic: [u8; 4],
    version: u32,
    dim: u64,
    vectors: Vec<f32>,
}

/// Why a persisted index could not be used.  Always recovered by resetting
/// the index (and its record store) to empty.
#[derive(Debug, thiserror::Error)]
pub enum IndexLoadError {
    #[error("no index file at {0}")]
    Missing(PathBuf),
    #[error("reading index file: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    #[error("index was built with dimension {stored}, expected {expected}")]
    DimensionMismatch { stored: usize, expected: usize },
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dim: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        check_vector(vector, self.dim)
    }

    /// Append `vector` and return its id (the number of vectors stored before
    /// the call).
    pub fn add(&mut self, vector: &[f32]) -> Result<u64> {
        self.check_vector(vector)?;
        let id = self.len() as u64;
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Up to `k` nearest stored vectors as `(id, squared_l2)`, closest first.
    /// Equal distances are ordered by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.check_vector(query)?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u64, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(id, stored)| (id as u64, squared_l2(stored, query)))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank);
        Ok(scored)
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, bincode::error::EncodeError> {
        let file = IndexFile {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dim: self.dim as u64,
            vectors: self.data.clone(),
        };
        bincode::encode_to_vec(file, bincode::config::standard())
    }

    /// Decode an index previously produced by [`encode`](Self::encode),
    /// verifying it was built for `expected_dim`.
    pub fn decode(bytes: &[u8], expected_dim: usize) -> Result<Self, IndexLoadError> {
        let (file, consumed): (IndexFile, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|err| IndexLoadError::Corrupt(err.to_string()))?;

        if file.magic != MAGIC {
            return Err(IndexLoadError::Corrupt("bad magic".to_string()));
        }
        if file.version != FORMAT_VERSION {
            return Err(IndexLoadError::Corrupt(format!(
                "unsupported format version {}",
                file.version
            )));
        }
        if consumed != bytes.len() {
            return Err(IndexLoadError::Corrupt(format!(
                "{} trailing bytes",
                bytes.len() - consumed
            )));
        }
        let stored = usize::try_from(file.dim)
            .map_err(|_| IndexLoadError::Corrupt(format!("dimension {} out of range", file.dim)))?;
        if stored != expected_dim {
            return Err(IndexLoadError::DimensionMismatch {
                stored,
                expected: expected_dim,
            });
        }
        if stored == 0 || file.vectors.len() % stored != 0 {
            return Err(IndexLoadError::Corrupt(format!(
                "{} components do not divide into vectors of {stored}",
                file.vectors.len()
            )));
        }

        if let Some(pos) = file.vectors.iter().position(|c| !c.is_finite()) {
            return Err(IndexLoadError::Corrupt(format!(
                "non-finite component in vector {}",
                pos / stored
            )));
        }

        Ok(Self {
            dim: stored,
            data: file.vectors,
        })
    }

    pub fn load(path: impl AsRef<Path>, expected_dim: usize) -> Result<Self, IndexLoadError> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexLoadError::Missing(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::decode(&bytes, expected_dim)
    }

    /// Write the whole index to `path`, replacing any previous file.
    ///
    /// A crash before the final rename leaves the previous file untouched.
    pub async fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = self
            .encode()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        let tmp_path = {
            let filename = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "memory_index.bin".to_string());
            path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: std::io::Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(())
    }
}

/// Length must equal `dim` and every component must be finite; a NaN or
/// infinite component would make distances unordered.
pub fn check_vector(vector: &[f32], dim: usize) -> Result<()> {
    if vector.len() != dim {
        return Err(MemoryError::DimensionMismatch {
            expected: dim,
            actual: vector.len(),
        });
    }
    if let Some(index) = vector.iter().position(|c| !c.is_finite()) {
        return Err(MemoryError::NonFiniteComponent { index });
    }
    Ok(())
}

/// Squared Euclidean distance.  Callers guarantee equal lengths.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn rank(left: &(u64, f32), right: &(u64, f32)) -> Ordering {
    left.1.total_cmp(&right.1).then(left.0.cmp(&right.0))
}
