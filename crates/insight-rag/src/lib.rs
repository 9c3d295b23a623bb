//! Retrieval-augmented answering over a scripture corpus.
//!
//! [`InsightService`] ties an embedder, a vector store and an optional
//! generator together. [`Ingestor`] fills the store from chunk records.

pub mod chat;
pub mod compose;
pub mod expand;
pub mod generator;
pub mod ingest;
pub mod retriever;
pub mod service;

pub use chat::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
pub use compose::AnswerComposer;
pub use expand::QueryExpander;
pub use generator::{build_generator, OllamaGenerator, OpenAiChatGenerator};
pub use ingest::{IngestReport, Ingestor};
pub use retriever::Retriever;
pub use service::{HealthReport, InsightService};
