//! Vector store backends behind [`insight_core::traits::VectorStore`].
//!
//! Both backends rank by cosine similarity and break exact ties by insertion
//! order.

pub mod lance;
pub mod memory;
pub mod schema;
pub mod similarity;
pub mod table;

use std::path::Path;
use std::sync::Arc;

use insight_core::config::{StoreBackend, StoreSettings};
use insight_core::traits::VectorStore;
use insight_core::types::Chunk;
use insight_core::{Error, Result};

pub use lance::LanceStore;
pub use memory::MemoryStore;

/// Open the configured store. Relative paths resolve against `base`.
pub async fn open_store(settings: &StoreSettings, base: &Path, dim: usize) -> Result<Arc<dyn VectorStore>> {
    let path = settings.resolved_path(base);
    match settings.backend {
        StoreBackend::Memory => {
            let store = match path {
                Some(p) => MemoryStore::open(p, dim)?,
                None => MemoryStore::new(dim),
            };
            Ok(Arc::new(store))
        }
        StoreBackend::LanceDb => {
            let path = path.ok_or_else(|| Error::InvalidConfig("store.path is required for lancedb".into()))?;
            std::fs::create_dir_all(&path)
                .map_err(|e| Error::store(format!("failed to create {}: {e}", path.display())))?;
            let store = LanceStore::open(&path.to_string_lossy(), &settings.table, dim).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Reject the whole batch if any chunk is malformed.
pub(crate) fn validate_chunks(chunks: &[Chunk], dim: usize) -> Result<()> {
    for chunk in chunks {
        if chunk.id.trim().is_empty() {
            return Err(Error::invalid_chunk(chunk.id.clone(), "empty id"));
        }
        if chunk.text.trim().is_empty() {
            return Err(Error::invalid_chunk(chunk.id.clone(), "empty text"));
        }
        if chunk.embedding.is_empty() {
            return Err(Error::invalid_chunk(chunk.id.clone(), "empty embedding"));
        }
        if chunk.embedding.len() != dim {
            return Err(Error::invalid_chunk(
                chunk.id.clone(),
                format!("embedding has {} dimensions, store expects {dim}", chunk.embedding.len()),
            ));
        }
        if chunk.embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::invalid_chunk(chunk.id.clone(), "embedding contains non-finite values"));
        }
    }
    Ok(())
}

pub(crate) fn check_query(vector: &[f32], dim: usize) -> Result<()> {
    if vector.len() != dim {
        return Err(Error::DimensionMismatch { expected: dim, actual: vector.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_names_the_offending_chunk() {
        let chunks = vec![Chunk::new("ok", "text", vec![1.0, 0.0]), Chunk::new("bad", "  ", vec![1.0, 0.0])];
        match validate_chunks(&chunks, 2) {
            Err(Error::InvalidChunk { id, reason }) => {
                assert_eq!(id, "bad");
                assert_eq!(reason, "empty text");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nan_embedding_is_rejected() {
        let chunks = vec![Chunk::new("n", "text", vec![f32::NAN, 0.0])];
        assert!(validate_chunks(&chunks, 2).is_err());
    }
}
