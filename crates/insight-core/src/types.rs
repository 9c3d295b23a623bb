//! Domain types shared by the embedding, store and answer engines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type ChunkId = String;
pub type Meta = HashMap<String, String>;

pub const DEFAULT_TOP_K: usize = 10;
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 50;

pub const NO_MATCHES_SUMMARY: &str =
    "No relevant passages were found for your query. Please try rephrasing your question.";

/// Citation metadata attached to a chunk by the ingestion collaborator.
///
/// - `section`: named section of the source text
/// - `page_ref`: page or folio reference (e.g. "Ang 12")
/// - `category`: coarse grouping such as a musical measure or chapter family
/// - `extra`: fields the core does not interpret (neighbour ids, raw page number)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub extra: Meta,
}

impl ChunkMetadata {
    pub fn citation(&self) -> Citation {
        Citation { section: self.section.clone(), page_ref: self.page_ref.clone() }
    }
}

/// A unit of source text with its precomputed embedding.
///
/// Chunks are created once at ingestion and never mutated; re-ingestion
/// replaces them wholesale by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self { id: id.into(), text: text.into(), embedding, metadata: ChunkMetadata::default() }
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A single request's query. Lives only for the duration of that request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), top_k: DEFAULT_TOP_K }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// `top_k` clamped to `[MIN_TOP_K, max]`, where `max` itself never
    /// exceeds `MAX_TOP_K`.
    pub fn clamped_top_k(&self, max: usize) -> usize {
        let max = max.clamp(MIN_TOP_K, MAX_TOP_K);
        self.top_k.clamp(MIN_TOP_K, max)
    }
}

/// A retrieved chunk and its similarity to the query (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Chunks ranked by non-increasing score, unique by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result from hits already ordered by the store. The sort is
    /// stable, so the store's tie-break survives; later duplicates of an id
    /// are dropped.
    pub fn from_ranked(mut hits: Vec<ScoredChunk>) -> Self {
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = std::collections::HashSet::new();
        hits.retain(|h| seen.insert(h.chunk.id.clone()));
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[ScoredChunk] {
        &self.hits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredChunk> {
        self.hits.iter()
    }

    pub fn top(&self) -> Option<&ScoredChunk> {
        self.hits.first()
    }

    pub fn into_hits(self) -> Vec<ScoredChunk> {
        self.hits
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a ScoredChunk;
    type IntoIter = std::slice::Iter<'a, ScoredChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub section: Option<String>,
    pub page_ref: Option<String>,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.section, &self.page_ref) {
            (Some(s), Some(p)) => write!(f, "{s}, {p}"),
            (Some(s), None) => write!(f, "{s}"),
            (None, Some(p)) => write!(f, "Unknown section, {p}"),
            (None, None) => write!(f, "Unknown section"),
        }
    }
}

/// Which path produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    Generated,
    Extractive,
    NoMatches,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedAnswer {
    pub summary: String,
    pub citations: Vec<Citation>,
    pub origin: AnswerOrigin,
}

impl ComposedAnswer {
    pub fn no_matches() -> Self {
        Self { summary: NO_MATCHES_SUMMARY.to_string(), citations: Vec::new(), origin: AnswerOrigin::NoMatches }
    }

    /// Plain-text rendering: the summary followed by a sources list.
    pub fn render(&self) -> String {
        let mut out = self.summary.trim_end().to_string();
        if !self.citations.is_empty() {
            out.push_str("\n\nSources:\n");
            for c in &self.citations {
                out.push_str(&format!("- {c}\n"));
            }
        }
        out
    }
}
