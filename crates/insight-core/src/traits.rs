use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, RetrievalResult};

/// Turns text into a fixed-length vector. One outbound call per `embed`;
/// implementations never retry.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside ingested vectors (usually the model name).
    fn name(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Persistent similarity index over chunks.
///
/// Similarity is cosine; exact ties rank by insertion order, where a
/// re-upserted id keeps its original position.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &'static str;
    /// Idempotent by chunk id.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Like `upsert`, but durability may be deferred until `flush`.
    /// Visible to queries immediately.
    async fn upsert_buffered(&self, chunks: &[Chunk]) -> Result<()> {
        self.upsert(chunks).await
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// At most `k` hits, fewer when the store holds fewer chunks.
    async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult>;
    async fn count(&self) -> Result<usize>;

    async fn set_meta(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn get_meta(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Prompt envelope handed to a generative backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: f32,
}

/// Optional language-model backend that writes prose from grounding context.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Cheap reachability check used by health reporting. Returns the model
    /// that would serve requests.
    async fn probe(&self) -> Result<String> {
        Ok(self.name().to_string())
    }
}
