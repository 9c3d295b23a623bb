use std::sync::Arc;
use std::time::Duration;

use insight_core::config::RetrievalSettings;
use insight_core::traits::{Embedder, VectorStore};
use insight_core::types::{Query, RetrievalResult};
use insight_core::{Error, Result};
use tracing::debug;

use crate::expand::QueryExpander;

/// Query → embedding → top-k chunks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    max_top_k: usize,
    store_timeout: Duration,
    expander: Option<QueryExpander>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, settings: &RetrievalSettings) -> Self {
        Self {
            embedder,
            store,
            max_top_k: settings.max_top_k,
            store_timeout: Duration::from_secs(settings.store_timeout_secs),
            expander: QueryExpander::from_settings(settings),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Blank queries fail with `InvalidQuery` before any embedding call.
    /// Embedding and store failures are returned unchanged.
    pub async fn retrieve(&self, query: &Query) -> Result<RetrievalResult> {
        if query.is_blank() {
            return Err(Error::invalid_query("query text is empty"));
        }
        let k = query.clamped_top_k(self.max_top_k);
        let text = query.text.trim();
        let vector = match &self.expander {
            Some(expander) => {
                let expanded = expander.expand(text);
                debug!(query = text, expanded = %expanded, "expanded query");
                self.embedder.embed(&expanded).await?
            }
            None => self.embedder.embed(text).await?,
        };

        let result = tokio::time::timeout(self.store_timeout, self.store.query(&vector, k))
            .await
            .map_err(|_| Error::store(format!("query timed out after {:?}", self.store_timeout)))??;
        debug!(k, hits = result.len(), backend = self.store.backend(), "retrieved chunks");
        Ok(result)
    }
}
