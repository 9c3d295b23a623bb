//! LanceDB-backed chunk store.
//!
//! | Column | Type | Purpose |
//! |--------|------|---------|
//! | `id` | Utf8 | chunk id, merge key |
//! | `text` | Utf8 | chunk text |
//! | `section`, `page_ref`, `category` | Utf8 (nullable) | citation metadata |
//! | `extra_json` | Utf8 | remaining metadata as a JSON object |
//! | `seq` | UInt64 | first-insertion order, used to break score ties |
//! | `vector` | FixedSizeList<Float32> | embedding |
//!
//! Searches use cosine distance; the score is `1 - distance`.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow_schema::DataType;
use async_trait::async_trait;
use futures::TryStreamExt;
use insight_core::traits::VectorStore;
use insight_core::types::{Chunk, ChunkMetadata, Meta, RetrievalResult, ScoredChunk};
use insight_core::{Error, Result};
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::schema::{
    build_chunk_schema, COL_CATEGORY, COL_DISTANCE, COL_EXTRA, COL_ID, COL_PAGE_REF, COL_SECTION, COL_SEQ, COL_TEXT,
    COL_VECTOR,
};
use crate::similarity::{rank, Candidate};
use crate::table::{ensure_table, get_meta, lance_err, open_db, quote, set_meta};
use crate::{check_query, validate_chunks};

/// Candidates fetched per requested hit. The window doubles while the
/// lowest fetched score still ties the k-th, so ties are re-ordered by `seq`
/// over every tied row.
const OVERFETCH: usize = 4;
const ID_LOOKUP_BATCH: usize = 256;

pub struct LanceStore {
    conn: Connection,
    table: Table,
    table_name: String,
    meta_table: String,
    dim: usize,
    // Serializes writers so seq assignment stays gap-free.
    write_lock: Mutex<()>,
}

impl LanceStore {
    /// Open (or create) `table_name` under the database at `uri`.
    pub async fn open(uri: &str, table_name: &str, dim: usize) -> Result<Self> {
        let dim_i32 = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("dimension {dim} too large")))?;
        let conn = open_db(uri).await?;
        let table = ensure_table(&conn, table_name, build_chunk_schema(dim_i32)).await?;

        let schema = table.schema().await.map_err(lance_err("failed to read table schema"))?;
        let stored_dim = schema.field_with_name(COL_VECTOR).ok().and_then(|f| match f.data_type() {
            DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
            _ => None,
        });
        match stored_dim {
            Some(actual) if actual != dim => return Err(Error::DimensionMismatch { expected: dim, actual }),
            Some(_) => {}
            None => return Err(Error::store(format!("table '{table_name}' has no '{COL_VECTOR}' column"))),
        }

        info!(uri, table = table_name, dim, "opened LanceDB store");
        Ok(Self {
            conn,
            table,
            table_name: table_name.to_string(),
            meta_table: format!("{table_name}_meta"),
            dim,
            write_lock: Mutex::new(()),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn existing_seqs(&self, ids: &[&str]) -> Result<HashMap<String, u64>> {
        let mut out = HashMap::new();
        for group in ids.chunks(ID_LOOKUP_BATCH) {
            let list = group.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
            let mut stream = self
                .table
                .query()
                .only_if(format!("{COL_ID} IN ({list})"))
                .select(Select::columns(&[COL_ID, COL_SEQ]))
                .execute()
                .await
                .map_err(lance_err("failed to look up existing ids"))?;
            while let Some(batch) = stream.try_next().await.map_err(lance_err("failed to read id lookup"))? {
                let found = string_col(&batch, COL_ID)?;
                let seqs = batch
                    .column_by_name(COL_SEQ)
                    .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                    .ok_or_else(|| Error::store("seq column missing"))?;
                for i in 0..batch.num_rows() {
                    out.insert(found.value(i).to_string(), seqs.value(i));
                }
            }
        }
        Ok(out)
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let mut stream = self
            .table
            .vector_search(vector.to_vec())
            .map_err(lance_err("failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(lance_err("vector search failed"))?;
        let mut candidates = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(lance_err("failed to read search results"))? {
            candidates.extend(parse_candidates(&batch)?);
        }
        Ok(candidates)
    }

    fn to_record_batch(&self, rows: &[(&Chunk, u64)]) -> Result<RecordBatch> {
        let dim = i32::try_from(self.dim).map_err(|_| Error::store("dimension overflow"))?;
        let mut extras = Vec::with_capacity(rows.len());
        for (chunk, _) in rows {
            let json = serde_json::to_string(&chunk.metadata.extra)
                .map_err(|e| Error::invalid_chunk(chunk.id.clone(), format!("metadata not serializable: {e}")))?;
            extras.push(json);
        }
        let vectors = rows.iter().map(|(c, _)| Some(c.embedding.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
        RecordBatch::try_new(
            build_chunk_schema(dim),
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.id.as_str()))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.text.as_str()))),
                Arc::new(StringArray::from_iter(rows.iter().map(|(c, _)| c.metadata.section.as_deref()))),
                Arc::new(StringArray::from_iter(rows.iter().map(|(c, _)| c.metadata.page_ref.as_deref()))),
                Arc::new(StringArray::from_iter(rows.iter().map(|(c, _)| c.metadata.category.as_deref()))),
                Arc::new(StringArray::from(extras)),
                Arc::new(UInt64Array::from_iter_values(rows.iter().map(|(_, seq)| *seq))),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim)),
            ],
        )
        .map_err(|e| Error::store(format!("failed to build record batch: {e}")))
    }
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::store(format!("{name} column missing")))
}

fn opt_value(col: &StringArray, i: usize) -> Option<String> {
    if col.is_null(i) {
        None
    } else {
        Some(col.value(i).to_string())
    }
}

/// True when rows beyond the fetched window could tie the k-th best score.
fn boundary_tied(candidates: &[Candidate], k: usize) -> bool {
    let mut scores: Vec<f32> = candidates.iter().map(|c| c.hit.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    match (scores.get(k.saturating_sub(1)), scores.last()) {
        (Some(kth), Some(lowest)) => kth == lowest,
        _ => false,
    }
}

/// Cosine distance to similarity. Zero-norm vectors yield no direction, so
/// a non-finite distance scores 0 like the in-memory cosine.
fn distance_to_score(distance: f32) -> f32 {
    let score = 1.0 - distance;
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn parse_extra(id: &str, raw: &str) -> Meta {
    match serde_json::from_str(raw) {
        Ok(extra) => extra,
        Err(e) => {
            warn!(id, error = %e, "ignoring unreadable extra metadata");
            Meta::default()
        }
    }
}

fn parse_candidates(batch: &RecordBatch) -> Result<Vec<Candidate>> {
    let ids = string_col(batch, COL_ID)?;
    let texts = string_col(batch, COL_TEXT)?;
    let sections = string_col(batch, COL_SECTION)?;
    let pages = string_col(batch, COL_PAGE_REF)?;
    let categories = string_col(batch, COL_CATEGORY)?;
    let extras = string_col(batch, COL_EXTRA)?;
    let seqs = batch
        .column_by_name(COL_SEQ)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| Error::store("seq column missing"))?;
    let vectors = batch
        .column_by_name(COL_VECTOR)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| Error::store("vector column missing"))?;
    let distances = batch
        .column_by_name(COL_DISTANCE)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| Error::store("_distance column missing"))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let extra = parse_extra(ids.value(i), extras.value(i));
        let embedding = vectors.value(i).as_primitive::<Float32Type>().values().to_vec();
        let metadata = ChunkMetadata {
            section: opt_value(sections, i),
            page_ref: opt_value(pages, i),
            category: opt_value(categories, i),
            extra,
        };
        let chunk = Chunk::new(ids.value(i), texts.value(i), embedding).with_metadata(metadata);
        let score = distance_to_score(distances.value(i));
        out.push(Candidate { seq: seqs.value(i), hit: ScoredChunk { chunk, score } });
    }
    Ok(out)
}

#[async_trait]
impl VectorStore for LanceStore {
    fn backend(&self) -> &'static str {
        "lancedb"
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        validate_chunks(chunks, self.dim)?;
        if chunks.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;

        // Last occurrence of an id within the batch wins.
        let mut order: Vec<&str> = Vec::new();
        let mut latest: HashMap<&str, &Chunk> = HashMap::new();
        for chunk in chunks {
            if latest.insert(chunk.id.as_str(), chunk).is_none() {
                order.push(chunk.id.as_str());
            }
        }

        let existing = self.existing_seqs(&order).await?;
        let mut next_seq = self.table.count_rows(None).await.map_err(lance_err("failed to count rows"))? as u64;
        let mut rows = Vec::with_capacity(order.len());
        for id in &order {
            let seq = match existing.get(*id) {
                Some(seq) => *seq,
                None => {
                    let seq = next_seq;
                    next_seq += 1;
                    seq
                }
            };
            if let Some(chunk) = latest.get(id) {
                rows.push((*chunk, seq));
            }
        }

        let batch = self.to_record_batch(&rows)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = self.table.merge_insert(&[COL_ID]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(lance_err("failed to upsert chunks"))?;
        debug!(table = %self.table_name, rows = rows.len(), updated = existing.len(), "upserted chunks");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        check_query(vector, self.dim)?;
        let total = self.count().await?;
        if k == 0 || total == 0 {
            return Ok(RetrievalResult::empty());
        }
        let mut limit = k.saturating_mul(OVERFETCH).min(total);
        loop {
            let candidates = self.search(vector, limit).await?;
            if candidates.len() < limit || limit >= total || !boundary_tied(&candidates, k) {
                return Ok(rank(candidates, k));
            }
            debug!(table = %self.table_name, limit, "widening search window over tied scores");
            limit = limit.saturating_mul(2).min(total);
        }
    }

    async fn count(&self) -> Result<usize> {
        self.table.count_rows(None).await.map_err(lance_err("failed to count rows"))
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        set_meta(&self.conn, &self.meta_table, key, value).await
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        get_meta(&self.conn, &self.meta_table, key).await
    }
}
