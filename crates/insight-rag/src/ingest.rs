//! Loading chunk records into a store.

use std::sync::Arc;

use chrono::Utc;
use insight_core::records::ChunkRecord;
use insight_core::traits::{Embedder, VectorStore};
use insight_core::types::Chunk;
use insight_core::{Error, Result};
use serde::Serialize;
use tracing::{info, warn};

pub const META_EMBEDDING_MODEL: &str = "embedding_model";
pub const META_DIMENSION: &str = "dimension";
pub const META_INGESTED_AT: &str = "ingested_at";

const DEFAULT_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records handed to the ingestor.
    pub loaded: usize,
    /// Records embedded during this run (the rest carried an embedding).
    pub embedded: usize,
    /// Records dropped before upsert.
    pub skipped: usize,
    pub upserted: usize,
}

pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn ingest(&self, records: Vec<ChunkRecord>) -> Result<IngestReport> {
        self.ingest_with_progress(records, |_| {}).await
    }

    /// `on_progress` receives the number of records processed so far after
    /// each batch. Batches are buffered in the store and flushed once at the
    /// end, including when a later batch fails.
    pub async fn ingest_with_progress<F>(&self, records: Vec<ChunkRecord>, on_progress: F) -> Result<IngestReport>
    where
        F: FnMut(usize),
    {
        let mut report = IngestReport { loaded: records.len(), ..IngestReport::default() };
        let loaded = self.load_batches(&records, &mut report, on_progress).await;
        let flushed = self.store.flush().await;
        if let (Err(_), Err(e)) = (&loaded, &flushed) {
            warn!(error = %e, "failed to flush store after ingestion error");
        }
        loaded?;
        flushed?;

        let dim = self.embedder.dim();
        self.store.set_meta(META_EMBEDDING_MODEL, self.embedder.name()).await?;
        self.store.set_meta(META_DIMENSION, &dim.to_string()).await?;
        self.store.set_meta(META_INGESTED_AT, &Utc::now().to_rfc3339()).await?;
        info!(
            loaded = report.loaded,
            embedded = report.embedded,
            skipped = report.skipped,
            upserted = report.upserted,
            backend = self.store.backend(),
            "ingestion finished"
        );
        Ok(report)
    }

    async fn load_batches<F>(&self, records: &[ChunkRecord], report: &mut IngestReport, mut on_progress: F) -> Result<()>
    where
        F: FnMut(usize),
    {
        let dim = self.embedder.dim();
        let mut processed = 0usize;

        for batch in records.chunks(self.batch_size) {
            let mut usable = Vec::with_capacity(batch.len());
            for record in batch {
                if record.text.trim().is_empty() {
                    warn!(id = %record.stable_id(), "skipping record with empty text");
                    report.skipped += 1;
                    continue;
                }
                if let Some(v) = &record.embedding {
                    if v.len() != dim {
                        warn!(id = %record.stable_id(), expected = dim, actual = v.len(), "skipping record with mismatched embedding");
                        report.skipped += 1;
                        continue;
                    }
                }
                usable.push(record);
            }

            let to_embed: Vec<String> =
                usable.iter().filter(|r| r.embedding.is_none()).map(|r| r.text.clone()).collect();
            let mut fresh = self.embedder.embed_batch(&to_embed).await?.into_iter();
            report.embedded += to_embed.len();

            let mut chunks = Vec::with_capacity(usable.len());
            for record in usable {
                let embedding = match &record.embedding {
                    Some(v) => v.clone(),
                    None => match fresh.next() {
                        Some(v) => v,
                        None => return Err(Error::embedding("embedder returned fewer vectors than requested")),
                    },
                };
                chunks.push(Chunk::new(record.stable_id(), record.text.clone(), embedding).with_metadata(record.metadata()));
            }

            self.store.upsert_buffered(&chunks).await?;
            report.upserted += chunks.len();
            processed += batch.len();
            on_progress(processed);
        }
        Ok(())
    }
}
