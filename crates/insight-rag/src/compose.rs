use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use insight_core::config::{GenerationSettings, RetrievalSettings};
use insight_core::traits::{GenerationRequest, Generator};
use insight_core::types::{AnswerOrigin, Citation, ComposedAnswer, Query, RetrievalResult};
use insight_core::{Error, Result};
use tracing::{debug, warn};

pub const GROUNDING_INSTRUCTION: &str = "You answer questions about a scripture using only the passages provided \
as context. If the passages do not answer the question, say so. Do not add facts that are not in the passages \
and never invent citations, sections or page references.";

const ELLIPSIS: char = '…';

/// Turns retrieved chunks into an answer, generatively when a backend is
/// available and extractively otherwise. Never fails.
pub struct AnswerComposer {
    generator: Option<Arc<dyn Generator>>,
    snippet_chars: usize,
    min_answer_chars: usize,
    temperature: f32,
    max_tokens: usize,
    top_p: f32,
    timeout: Duration,
}

impl AnswerComposer {
    pub fn new(
        generator: Option<Arc<dyn Generator>>,
        generation: &GenerationSettings,
        retrieval: &RetrievalSettings,
    ) -> Self {
        Self {
            generator: if generation.enabled { generator } else { None },
            snippet_chars: retrieval.snippet_chars,
            min_answer_chars: generation.min_answer_chars,
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            top_p: generation.top_p,
            timeout: Duration::from_secs(generation.timeout_secs.max(1)),
        }
    }

    /// Extractive-only composer.
    pub fn extractive(snippet_chars: usize) -> Self {
        let generation = GenerationSettings { enabled: false, ..GenerationSettings::default() };
        let retrieval = RetrievalSettings { snippet_chars, ..RetrievalSettings::default() };
        Self::new(None, &generation, &retrieval)
    }

    pub fn generator(&self) -> Option<&Arc<dyn Generator>> {
        self.generator.as_ref()
    }

    pub async fn compose(&self, query: &Query, results: &RetrievalResult) -> ComposedAnswer {
        if results.is_empty() {
            return ComposedAnswer::no_matches();
        }
        if let Some(generator) = &self.generator {
            match self.generate(generator.as_ref(), query, results).await {
                Ok(summary) => {
                    return ComposedAnswer { summary, citations: citations(results), origin: AnswerOrigin::Generated };
                }
                Err(e) => warn!(backend = generator.name(), error = %e, "generation failed; using extractive answer"),
            }
        }
        self.extractive_answer(results)
    }

    async fn generate(&self, generator: &dyn Generator, query: &Query, results: &RetrievalResult) -> Result<String> {
        let request = GenerationRequest {
            system: GROUNDING_INSTRUCTION.to_string(),
            prompt: build_prompt(query.text.trim(), results),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        };
        let answer = tokio::time::timeout(self.timeout, generator.generate(&request))
            .await
            .map_err(|_| Error::generation(format!("timed out after {:?}", self.timeout)))??;
        let answer = answer.trim();
        let chars = answer.chars().count();
        if chars < self.min_answer_chars {
            return Err(Error::generation(format!("answer too short ({chars} < {} chars)", self.min_answer_chars)));
        }
        debug!(backend = generator.name(), chars, "generated answer");
        Ok(answer.to_string())
    }

    /// Bulleted snippets in rank order.
    pub fn extractive_answer(&self, results: &RetrievalResult) -> ComposedAnswer {
        if results.is_empty() {
            return ComposedAnswer::no_matches();
        }
        let summary = results
            .iter()
            .map(|hit| {
                let flat = hit.chunk.text.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("- {}", truncate_chars(&flat, self.snippet_chars))
            })
            .collect::<Vec<_>>()
            .join("\n");
        ComposedAnswer { summary, citations: citations(results), origin: AnswerOrigin::Extractive }
    }
}

/// The question followed by every chunk's verbatim text in rank order.
pub fn build_prompt(question: &str, results: &RetrievalResult) -> String {
    let mut prompt = format!("Question: {question}\n\nContext passages:\n");
    for (i, hit) in results.iter().enumerate() {
        let citation = hit.chunk.metadata.citation();
        prompt.push_str(&format!("\n[{}] ({citation})\n{}\n", i + 1, hit.chunk.text));
    }
    prompt.push_str("\nAnswer the question in 4-6 sentences using only the passages above.");
    prompt
}

/// Citations of the results, unique by `(section, page_ref)`, first-seen order.
pub fn citations(results: &RetrievalResult) -> Vec<Citation> {
    let mut seen = HashSet::new();
    results
        .iter()
        .map(|hit| hit.chunk.metadata.citation())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// At most `max` characters; a cut text ends in an ellipsis that counts
/// toward the limit.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}
