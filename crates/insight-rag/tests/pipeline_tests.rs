use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use insight_core::config::{GenerationSettings, RetrievalSettings};
use insight_core::traits::{Embedder, GenerationRequest, Generator, VectorStore};
use insight_core::types::{AnswerOrigin, Chunk, ChunkMetadata, Query, RetrievalResult, NO_MATCHES_SUMMARY};
use insight_core::{Error, Result};
use insight_rag::{AnswerComposer, ChatCompletionRequest, ChatMessage, InsightService, Retriever};
use insight_vector::MemoryStore;

const DIM: usize = 4;

/// Maps keywords onto axes: love/devotion → 0, ego → 1, equal* → 2, else 3.
struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0; DIM];
        if lower.contains("love") || lower.contains("devotion") {
            v[0] = 1.0;
        }
        if lower.contains("ego") {
            v[1] = 1.0;
        }
        if lower.contains("equal") {
            v[2] = 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[3] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    fn dim(&self) -> usize {
        DIM
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn name(&self) -> &str {
        "down"
    }

    fn dim(&self) -> usize {
        DIM
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::embedding("connection refused"))
    }
}

struct DownStore;

#[async_trait]
impl VectorStore for DownStore {
    fn backend(&self) -> &'static str {
        "down"
    }

    async fn upsert(&self, _chunks: &[Chunk]) -> Result<()> {
        Err(Error::store("index missing"))
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> Result<RetrievalResult> {
        Err(Error::store("index missing"))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::store("index missing"))
    }
}

/// Answers only after a delay.
struct SlowStore {
    delay: Duration,
}

#[async_trait]
impl VectorStore for SlowStore {
    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn upsert(&self, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> Result<RetrievalResult> {
        tokio::time::sleep(self.delay).await;
        Ok(RetrievalResult::empty())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }
}

enum Behaviour {
    Fail,
    Short,
    Slow,
    Answer(&'static str),
}

struct ScriptedGenerator {
    behaviour: Behaviour,
    last_prompt: std::sync::Mutex<Option<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self { behaviour, last_prompt: std::sync::Mutex::new(None) })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        *self.last_prompt.lock().unwrap() = Some(request.clone());
        match self.behaviour {
            Behaviour::Fail => Err(Error::generation("HTTP 500")),
            Behaviour::Short => Ok("Yes.".to_string()),
            Behaviour::Slow => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            }
            Behaviour::Answer(text) => Ok(text.to_string()),
        }
    }
}

fn section(name: &str, page: &str) -> ChunkMetadata {
    ChunkMetadata { section: Some(name.into()), page_ref: Some(page.into()), ..ChunkMetadata::default() }
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(DIM));
    let chunks = vec![
        ("love", "Love is the true devotion; the devotee merges in the beloved.", section("Asa", "Ang 349")),
        ("ego", "Ego is the great disease; the cure is within it.", section("Vaar Asa", "Ang 466")),
        ("equality", "All are equal; recognise the one light in all.", section("Sri Raag", "Ang 62")),
    ];
    let chunks: Vec<Chunk> = chunks
        .into_iter()
        .map(|(id, text, meta)| Chunk::new(id, text, KeywordEmbedder::vector(text)).with_metadata(meta))
        .collect();
    store.upsert(&chunks).await.unwrap();
    store
}

fn generation(enabled: bool, timeout_secs: u64) -> GenerationSettings {
    GenerationSettings { enabled, timeout_secs, ..GenerationSettings::default() }
}

async fn service_with(generator: Option<Arc<dyn Generator>>, timeout_secs: u64) -> InsightService {
    let retrieval = RetrievalSettings::default();
    let retriever = Retriever::new(Arc::new(KeywordEmbedder::new()), seeded_store().await, &retrieval);
    let composer = AnswerComposer::new(generator.clone(), &generation(generator.is_some(), timeout_secs), &retrieval);
    InsightService::new(retriever, composer, retrieval.default_top_k)
}

#[tokio::test]
async fn devotion_query_ranks_love_first_with_exact_citations() {
    let service = service_with(None, 25).await;
    let query = Query::new("What is true devotion?").with_top_k(2);

    let results = service.search(&query).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(ids, ["love", "ego"], "tie between ego and equality resolves by insertion order");

    let answer = service.answer(&query).await.unwrap();
    assert_eq!(answer.origin, AnswerOrigin::Extractive);
    let cites: Vec<String> = answer.citations.iter().map(ToString::to_string).collect();
    assert_eq!(cites, ["Asa, Ang 349", "Vaar Asa, Ang 466"]);
    assert!(answer.summary.starts_with("- Love is the true devotion"));
}

#[tokio::test]
async fn blank_query_never_reaches_the_embedder() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let retriever = Retriever::new(embedder.clone(), seeded_store().await, &RetrievalSettings::default());
    for text in ["", "   ", "\n\t"] {
        let err = retriever.retrieve(&Query::new(text)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert!(err.is_caller_error());
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn top_k_is_clamped() {
    let service = service_with(None, 25).await;
    let zero = service.search(&Query::new("love").with_top_k(0)).await.unwrap();
    assert_eq!(zero.len(), 1);
    let huge = service.search(&Query::new("love").with_top_k(500)).await.unwrap();
    assert_eq!(huge.len(), 3);
}

#[tokio::test]
async fn backend_errors_propagate_unchanged() {
    let settings = RetrievalSettings::default();
    let no_embed = Retriever::new(Arc::new(DownEmbedder), seeded_store().await, &settings);
    let err = no_embed.retrieve(&Query::new("love")).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)));

    let no_store = Retriever::new(Arc::new(KeywordEmbedder::new()), Arc::new(DownStore), &settings);
    let err = no_store.retrieve(&Query::new("love")).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_store_query_times_out_as_unavailable() {
    let settings = RetrievalSettings { store_timeout_secs: 1, ..RetrievalSettings::default() };
    let store = Arc::new(SlowStore { delay: Duration::from_secs(5) });
    let retriever = Retriever::new(Arc::new(KeywordEmbedder::new()), store, &settings);

    let started = std::time::Instant::now();
    let err = retriever.retrieve(&Query::new("love")).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)), "got {err}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn query_expansion_reaches_related_passages() {
    let query = Query::new("How do I overcome pride?").with_top_k(1);

    let plain = Retriever::new(Arc::new(KeywordEmbedder::new()), seeded_store().await, &RetrievalSettings::default());
    let top = plain.retrieve(&query).await.unwrap();
    assert_eq!(top.top().map(|h| h.chunk.id.as_str()), Some("love"));
    assert_eq!(top.top().map(|h| h.score), Some(0.0));

    let settings = RetrievalSettings { expand_query: true, ..RetrievalSettings::default() };
    let embedder = Arc::new(KeywordEmbedder::new());
    let expanded = Retriever::new(embedder.clone(), seeded_store().await, &settings);
    let top = expanded.retrieve(&query).await.unwrap();
    let hit = top.top().unwrap();
    assert_eq!(hit.chunk.id, "ego");
    assert!((hit.score - 1.0).abs() < 1e-4);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_store_yields_no_matches_answer() {
    let settings = RetrievalSettings::default();
    let retriever = Retriever::new(Arc::new(KeywordEmbedder::new()), Arc::new(MemoryStore::new(DIM)), &settings);
    let generator = ScriptedGenerator::new(Behaviour::Answer("unused"));
    let composer = AnswerComposer::new(Some(generator.clone()), &generation(true, 25), &settings);
    let service = InsightService::new(retriever, composer, 10);

    let answer = service.answer(&Query::new("anything at all")).await.unwrap();
    assert_eq!(answer.origin, AnswerOrigin::NoMatches);
    assert_eq!(answer.summary, NO_MATCHES_SUMMARY);
    assert!(answer.citations.is_empty());
    assert!(generator.last_prompt.lock().unwrap().is_none(), "generator not called without matches");
}

#[tokio::test]
async fn failing_generator_falls_back_silently() {
    for behaviour in [Behaviour::Fail, Behaviour::Short] {
        let service = service_with(Some(ScriptedGenerator::new(behaviour)), 25).await;
        let answer = service.answer(&Query::new("ego").with_top_k(2)).await.unwrap();
        assert_eq!(answer.origin, AnswerOrigin::Extractive);
        assert!(!answer.citations.is_empty());
        assert!(answer.summary.lines().all(|l| l.starts_with("- ")));
    }
}

#[tokio::test]
async fn slow_generator_times_out_into_fallback() {
    let service = service_with(Some(ScriptedGenerator::new(Behaviour::Slow)), 1).await;
    let answer = service.answer(&Query::new("equality").with_top_k(1)).await.unwrap();
    assert_eq!(answer.origin, AnswerOrigin::Extractive);
    assert_eq!(answer.citations[0].to_string(), "Sri Raag, Ang 62");
}

#[tokio::test]
async fn generated_answer_is_grounded_on_every_chunk() {
    let text = "True devotion is love without condition: the devotee dissolves ego and sees the one light \
                in all, as the passages on love and equality describe.";
    let generator = ScriptedGenerator::new(Behaviour::Answer(text));
    let service = service_with(Some(generator.clone()), 25).await;

    let answer = service.answer(&Query::new("What is true devotion?").with_top_k(3)).await.unwrap();
    assert_eq!(answer.origin, AnswerOrigin::Generated);
    assert_eq!(answer.summary, text);
    assert_eq!(answer.citations.len(), 3);

    let request = generator.last_prompt.lock().unwrap().clone().unwrap();
    assert!(request.prompt.contains("What is true devotion?"));
    for passage in ["Love is the true devotion", "Ego is the great disease", "All are equal"] {
        assert!(request.prompt.contains(passage), "prompt misses {passage}");
    }
    assert!(!request.system.is_empty());
}

#[tokio::test]
async fn disabled_generation_never_calls_backend() {
    let generator = ScriptedGenerator::new(Behaviour::Answer("never"));
    let retrieval = RetrievalSettings::default();
    let retriever = Retriever::new(Arc::new(KeywordEmbedder::new()), seeded_store().await, &retrieval);
    let composer = AnswerComposer::new(Some(generator.clone()), &generation(false, 25), &retrieval);
    let service = InsightService::new(retriever, composer, 10);

    let answer = service.answer(&Query::new("love")).await.unwrap();
    assert_eq!(answer.origin, AnswerOrigin::Extractive);
    assert!(generator.last_prompt.lock().unwrap().is_none());
    assert_eq!(service.health().await.generator, "disabled");
}

#[tokio::test]
async fn reingesting_identical_content_keeps_results() {
    let store = seeded_store().await;
    let before = store.query(&KeywordEmbedder::vector("love ego"), 3).await.unwrap();
    let again: Vec<Chunk> = before.iter().map(|h| h.chunk.clone()).collect();
    store.upsert(&again).await.unwrap();
    let after = store.query(&KeywordEmbedder::vector("love ego"), 3).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn chat_request_round_trip() {
    let service = service_with(None, 25).await;
    let request = ChatCompletionRequest {
        messages: vec![ChatMessage::user("tell me about ego")],
        model: "scripture-insight".into(),
        top_k: Some(1),
    };
    let response = service.chat(&request).await.unwrap();
    assert_eq!(response.model, "scripture-insight");
    assert_eq!(response.citations.len(), 1);
    let content = response.content().unwrap();
    assert!(content.contains("Ego is the great disease"));
    assert!(content.contains("Sources:"));
}

#[tokio::test]
async fn health_reports_documents_and_embedder() {
    let service = service_with(Some(ScriptedGenerator::new(Behaviour::Fail)), 25).await;
    let report = service.health().await;
    assert_eq!(report.documents, Some(3));
    assert_eq!(report.embedder, "keyword (4 dims)");
    assert_eq!(report.generator, "ok scripted");
    assert!(report.to_string().contains("documents: 3"));
}
