//! Ollama embeddings client (`POST /api/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use insight_core::traits::Embedder;
use insight_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{check_vector, transport_error};

#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dim: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dim: usize, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::InvalidConfig("missing Ollama embedding model name".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build Ollama HTTP client: {e}")))?;
        let endpoint = format!("{}/api/embeddings", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, model: model.to_string(), dim })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(chars = text.len(), "requesting embedding");
        let request = EmbeddingRequest { model: &self.model, prompt: text };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&self.endpoint, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::embedding(format!("Ollama embeddings request failed ({status}): {body}")));
        }
        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| transport_error(&self.endpoint, &e))?;
        let vector = parsed
            .embedding
            .ok_or_else(|| Error::embedding("Ollama response missing 'embedding' field"))?;
        check_vector(vector, self.dim)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}
