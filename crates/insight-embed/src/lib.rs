//! Embedding clients.
//!
//! `OllamaEmbedder` and `OpenAiEmbedder` call an external embedding service
//! over HTTP; `FakeEmbedder` is a deterministic hashed bag-of-words used for
//! tests and offline development. Every client validates what it gets back
//! and reports any transport or payload problem as
//! `Error::EmbeddingUnavailable`. None of them retry.

use std::sync::Arc;
use std::time::Duration;

use insight_core::config::{EmbeddingApi, EmbeddingSettings};
use insight_core::traits::Embedder;
use insight_core::{Error, Result};
use tracing::info;

mod fake;
mod ollama;
mod openai;

pub use fake::FakeEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Build the embedder described by `settings`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the fake embedder regardless of the
/// configured api, keeping the configured dimension.
pub fn build_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let api = if use_fake { EmbeddingApi::Fake } else { settings.api };
    let timeout = Duration::from_secs(settings.timeout_secs);
    match api {
        EmbeddingApi::Fake => {
            info!(dim = settings.dimension, "using fake embedder");
            Ok(Arc::new(FakeEmbedder::new(settings.dimension)))
        }
        EmbeddingApi::Ollama => {
            info!(model = %settings.model, url = %settings.base_url, "using ollama embedder");
            Ok(Arc::new(OllamaEmbedder::new(&settings.base_url, &settings.model, settings.dimension, timeout)?))
        }
        EmbeddingApi::OpenAi => {
            info!(model = %settings.model, url = %settings.base_url, "using openai-compatible embedder");
            Ok(Arc::new(OpenAiEmbedder::new(
                &settings.base_url,
                &settings.model,
                settings.api_key.as_deref(),
                settings.dimension,
                timeout,
            )?))
        }
    }
}

/// Reject vectors that are empty, of the wrong length, or not finite.
pub(crate) fn check_vector(vector: Vec<f32>, dim: usize) -> Result<Vec<f32>> {
    if vector.is_empty() {
        return Err(Error::embedding("service returned an empty embedding"));
    }
    if vector.len() != dim {
        return Err(Error::embedding(format!("expected {dim} dimensions, got {}", vector.len())));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(Error::embedding("embedding contains non-finite values"));
    }
    Ok(vector)
}

pub(crate) fn transport_error(endpoint: &str, err: &reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "unreachable"
    } else if err.is_decode() {
        "returned a malformed response"
    } else {
        "request failed"
    };
    Error::embedding(format!("{endpoint} {kind}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_vector_rules() {
        assert!(check_vector(vec![0.1, 0.2], 2).is_ok());
        assert!(matches!(check_vector(vec![], 2), Err(Error::EmbeddingUnavailable(_))));
        assert!(matches!(check_vector(vec![0.1], 2), Err(Error::EmbeddingUnavailable(_))));
        assert!(matches!(check_vector(vec![0.1, f32::NAN], 2), Err(Error::EmbeddingUnavailable(_))));
    }

    #[test]
    fn fake_api_builds_fake_embedder() {
        let settings = EmbeddingSettings { api: EmbeddingApi::Fake, dimension: 16, ..EmbeddingSettings::default() };
        let embedder = build_embedder(&settings).expect("build");
        assert_eq!(embedder.name(), "fake");
        assert_eq!(embedder.dim(), 16);
    }
}
