//! Brute-force in-process store with an optional JSON snapshot file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use insight_core::traits::VectorStore;
use insight_core::types::{Chunk, RetrievalResult, ScoredChunk};
use insight_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::similarity::{cosine, rank, Candidate};
use crate::{check_query, validate_chunks};

#[derive(Debug, Deserialize)]
struct Snapshot {
    dimension: usize,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    chunks: Vec<Chunk>,
}

#[derive(Debug, Default, Clone)]
struct Inner {
    // Insertion order is the vector position.
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
    meta: BTreeMap<String, String>,
    // Buffered writes not yet in the snapshot.
    dirty: bool,
}

impl Inner {
    fn apply(&mut self, chunks: &[Chunk]) {
        for chunk in chunks {
            match self.positions.get(&chunk.id).copied() {
                Some(pos) => self.chunks[pos] = chunk.clone(),
                None => {
                    self.positions.insert(chunk.id.clone(), self.chunks.len());
                    self.chunks.push(chunk.clone());
                }
            }
        }
    }
}

pub struct MemoryStore {
    dim: usize,
    inner: RwLock<Inner>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, inner: RwLock::new(Inner::default()), snapshot: None }
    }

    /// Open a store persisted at `path`. A missing file starts empty and is
    /// created on the first write.
    pub fn open(path: impl Into<PathBuf>, dim: usize) -> Result<Self> {
        let path = path.into();
        let mut inner = Inner::default();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::store(format!("failed to read snapshot {}: {e}", path.display())))?;
            let snap: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| Error::store(format!("corrupt snapshot {}: {e}", path.display())))?;
            if snap.dimension != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: snap.dimension });
            }
            for chunk in snap.chunks {
                inner.positions.insert(chunk.id.clone(), inner.chunks.len());
                inner.chunks.push(chunk);
            }
            inner.meta = snap.meta;
            info!(path = %path.display(), chunks = inner.chunks.len(), "loaded memory store snapshot");
        }
        Ok(Self { dim, inner: RwLock::new(inner), snapshot: Some(path) })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    fn persist(&self, meta: &BTreeMap<String, String>, chunks: &[Chunk]) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snap = SnapshotRef { dimension: self.dim, meta, chunks };
        let body = serde_json::to_vec(&snap).map_err(|e| Error::store(format!("failed to encode snapshot: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::store(format!("failed to create {}: {e}", parent.display())))?;
        }
        // Replace atomically.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| Error::store(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path).map_err(|e| Error::store(format!("failed to replace {}: {e}", path.display())))?;
        debug!(path = %path.display(), chunks = chunks.len(), "persisted memory store snapshot");
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    dimension: usize,
    meta: &'a BTreeMap<String, String>,
    chunks: &'a [Chunk],
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        validate_chunks(chunks, self.dim)?;
        let mut inner = self.inner.write().await;
        if self.snapshot.is_none() {
            inner.apply(chunks);
            return Ok(());
        }
        // Nothing becomes visible unless the snapshot write succeeds.
        let mut staged = inner.clone();
        staged.apply(chunks);
        self.persist(&staged.meta, &staged.chunks)?;
        staged.dirty = false;
        *inner = staged;
        Ok(())
    }

    async fn upsert_buffered(&self, chunks: &[Chunk]) -> Result<()> {
        validate_chunks(chunks, self.dim)?;
        let mut inner = self.inner.write().await;
        inner.apply(chunks);
        inner.dirty = self.snapshot.is_some();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.dirty {
            self.persist(&inner.meta, &inner.chunks)?;
            inner.dirty = false;
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        check_query(vector, self.dim)?;
        let inner = self.inner.read().await;
        let candidates = inner
            .chunks
            .iter()
            .enumerate()
            .map(|(seq, chunk)| Candidate {
                seq: seq as u64,
                hit: ScoredChunk { chunk: chunk.clone(), score: cosine(vector, &chunk.embedding) },
            })
            .collect();
        Ok(rank(candidates, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.chunks.len())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let mut meta = inner.meta.clone();
        meta.insert(key.to_string(), value.to_string());
        self.persist(&meta, &inner.chunks)?;
        inner.meta = meta;
        inner.dirty = false;
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.meta.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, v: Vec<f32>) -> Chunk {
        Chunk::new(id, format!("text of {id}"), v)
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = MemoryStore::new(2);
        store.upsert(&[chunk("a", vec![1.0, 0.0]), chunk("b", vec![1.0, 0.0])]).await.unwrap();
        let mut replaced = chunk("a", vec![1.0, 0.0]);
        replaced.text = "new text".into();
        store.upsert(&[replaced]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let res = store.query(&[1.0, 0.0], 5).await.unwrap();
        let ids: Vec<_> = res.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"], "re-upserted id keeps its position");
        assert_eq!(res.hits()[0].chunk.text, "new text");
    }

    #[tokio::test]
    async fn rejected_batch_leaves_store_untouched() {
        let store = MemoryStore::new(2);
        let err = store.upsert(&[chunk("a", vec![1.0, 0.0]), chunk("b", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidChunk { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_snapshot_write_keeps_previous_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("file.txt");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = MemoryStore::open(blocker.join("chunks.json"), 2).unwrap();

        let err = store.upsert(&[chunk("a", vec![1.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.query(&[1.0, 0.0], 1).await.unwrap().is_empty());

        assert!(store.set_meta("dimension", "2").await.is_err());
        assert_eq!(store.get_meta("dimension").await.unwrap(), None);
    }

    #[tokio::test]
    async fn buffered_writes_land_on_flush() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("chunks.json");
        let store = MemoryStore::open(&path, 2).unwrap();

        store.upsert_buffered(&[chunk("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert_buffered(&[chunk("b", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(!path.exists(), "buffered writes stay in memory");

        store.flush().await.unwrap();
        let reopened = MemoryStore::open(&path, 2).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_dimension_is_checked() {
        let store = MemoryStore::new(3);
        let err = store.query(&[1.0], 1).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 1 }));
    }
}
