use std::fmt;
use std::path::Path;
use std::sync::Arc;

use insight_core::config::Settings;
use insight_core::types::{ComposedAnswer, Query, RetrievalResult};
use insight_core::Result;
use insight_embed::build_embedder;
use insight_vector::open_store;
use serde::Serialize;
use tracing::{info, warn};

use crate::chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::compose::AnswerComposer;
use crate::generator::build_generator;
use crate::ingest::{Ingestor, META_DIMENSION, META_EMBEDDING_MODEL};
use crate::retriever::Retriever;

/// Component status as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub documents: Option<usize>,
    pub store: String,
    pub embedder: String,
    pub generator: String,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.documents {
            Some(n) => writeln!(f, "documents: {n}")?,
            None => writeln!(f, "documents: unknown")?,
        }
        writeln!(f, "store:     {}", self.store)?;
        writeln!(f, "embedder:  {}", self.embedder)?;
        write!(f, "generator: {}", self.generator)
    }
}

/// Retrieval plus answer composition over one store.
pub struct InsightService {
    retriever: Retriever,
    composer: AnswerComposer,
    default_top_k: usize,
}

impl InsightService {
    pub fn new(retriever: Retriever, composer: AnswerComposer, default_top_k: usize) -> Self {
        Self { retriever, composer, default_top_k }
    }

    /// Wire every component from settings. Relative store paths resolve
    /// against `base`.
    pub async fn from_settings(settings: &Settings, base: &Path) -> Result<Self> {
        let embedder = build_embedder(&settings.embedding)?;
        let store = open_store(&settings.store, base, embedder.dim()).await?;
        let generator = build_generator(&settings.generation)?;
        let retriever = Retriever::new(embedder, store, &settings.retrieval);
        let composer = AnswerComposer::new(generator, &settings.generation, &settings.retrieval);
        let service = Self::new(retriever, composer, settings.retrieval.default_top_k);
        service.check_store_metadata().await;
        Ok(service)
    }

    /// Warn when the store was built with a different embedding model or
    /// dimension than the one configured now.
    pub async fn check_store_metadata(&self) {
        let store = self.retriever.store();
        let embedder = self.retriever.embedder();
        match store.get_meta(META_EMBEDDING_MODEL).await {
            Ok(Some(recorded)) if recorded != embedder.name() => warn!(
                recorded = %recorded,
                configured = embedder.name(),
                "store was ingested with a different embedding model; results may be meaningless"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read store metadata"),
        }
        if let Ok(Some(dim)) = store.get_meta(META_DIMENSION).await {
            if dim != embedder.dim().to_string() {
                warn!(recorded = %dim, configured = embedder.dim(), "store dimension differs from embedder");
            }
        }
    }

    pub fn query(&self, text: impl Into<String>, top_k: Option<usize>) -> Query {
        Query::new(text).with_top_k(top_k.unwrap_or(self.default_top_k))
    }

    pub async fn search(&self, query: &Query) -> Result<RetrievalResult> {
        self.retriever.retrieve(query).await
    }

    /// Retrieval errors are returned; generation problems never are.
    pub async fn answer(&self, query: &Query) -> Result<ComposedAnswer> {
        let results = self.retriever.retrieve(query).await?;
        Ok(self.composer.compose(query, &results).await)
    }

    pub async fn chat(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let mut query = request.to_query()?;
        if request.top_k.is_none() {
            query.top_k = self.default_top_k;
        }
        let answer = self.answer(&query).await?;
        Ok(ChatCompletionResponse::from_answer(&request.model, &answer))
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.retriever.embedder().clone(), self.retriever.store().clone())
    }

    pub async fn health(&self) -> HealthReport {
        let store = self.retriever.store();
        let embedder = self.retriever.embedder();
        let (documents, store_status) = match store.count().await {
            Ok(n) => (Some(n), format!("ok ({})", store.backend())),
            Err(e) => (None, format!("unavailable ({}): {e}", store.backend())),
        };
        let generator = match self.composer.generator() {
            None => "disabled".to_string(),
            Some(g) => match g.probe().await {
                Ok(model) => format!("ok {model}"),
                Err(e) => format!("unavailable: {e}"),
            },
        };
        let report = HealthReport {
            documents,
            store: store_status,
            embedder: format!("{} ({} dims)", embedder.name(), embedder.dim()),
            generator,
        };
        info!(
            documents = ?report.documents,
            store = %report.store,
            embedder = %report.embedder,
            generator = %report.generator,
            "health"
        );
        report
    }
}
