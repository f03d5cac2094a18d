//! Context assembly for the prompt builder
//!
//! Takes ranked chunks, folds them into one block per source document,
//! enriches the leading documents from the citation graph and keeps adding
//! blocks in rank order until the token budget is reached.

mod assembler;
mod render;

pub use assembler::ContextAssembler;
pub use render::render_context;

use crate::graph::RelatedSummary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Validity of a norm at query time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegalState {
    #[default]
    #[serde(alias = "vigente")]
    Current,
    #[serde(alias = "derogado", alias = "derogada")]
    Repealed,
    #[serde(alias = "modificado", alias = "modificada")]
    Amended,
}

impl LegalState {
    /// Label used in rendered prompt text
    pub fn label(&self) -> &'static str {
        match self {
            LegalState::Current => "vigente",
            LegalState::Repealed => "derogado",
            LegalState::Amended => "modificado",
        }
    }
}

/// Metadata stored with every indexed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "legalState")]
    pub legal_state: LegalState,
    #[serde(default, alias = "chunkIndex")]
    pub chunk_index: u32,
    #[serde(default = "one", alias = "totalChunks")]
    pub total_chunks: u32,
    #[serde(default, alias = "sourceUrl", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Auxiliary fields the index carries (book, chapter, year, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn one() -> u32 {
    1
}

/// A slice of a source document as returned by vector search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(alias = "sourceDocId")]
    pub source_doc_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default, alias = "similarityScore")]
    pub similarity_score: f32,
}

/// Chunk with the reranker's relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    #[serde(default, alias = "rerankScore", skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RerankedChunk {
    pub fn new(chunk: Chunk, rerank_score: Option<f32>) -> Self {
        Self {
            chunk,
            rerank_score,
        }
    }

    /// Rerank score when available, similarity otherwise
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.chunk.similarity_score)
    }
}

/// Citation shown alongside the answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub title: String,
    pub legal_state: LegalState,
    pub link: String,
}

/// All retrieved text for one source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleBlock {
    pub id: String,
    pub title: String,
    pub category: String,
    pub legal_state: LegalState,
    pub link: String,
    /// Chunk indices merged into `text`, ascending
    pub chunk_indices: Vec<u32>,
    pub text: String,
    /// Graph neighbours, kept apart from retrieved text
    pub related: Vec<RelatedSummary>,
    /// Score of the document's best chunk
    pub score: f32,
    pub estimated_tokens: usize,
}

impl ArticleBlock {
    /// Text the token estimate is computed over
    fn budget_text(&self) -> String {
        let mut text = self.text.clone();
        for related in &self.related {
            text.push('\n');
            text.push_str(&related.describe());
        }
        text
    }
}

/// Counters describing how the context was built
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub chunks_retrieved: usize,
    pub chunks_after_reranking: usize,
    pub unique_articles: usize,
    pub articles_included: usize,
    pub tokens_used: usize,
    /// Set when a document was left out because it would not fit
    pub budget_exhausted: bool,
}

/// Result handed to the prompt builder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub articles: Vec<ArticleBlock>,
    pub sources: Vec<Citation>,
    pub debug: DebugInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // counted in characters, not bytes
        assert_eq!(estimate_tokens("ññññ"), 1);
    }

    #[test]
    fn test_chunk_accepts_camel_case_and_extra_fields() {
        let chunk: RerankedChunk = serde_json::from_str(
            r#"{
                "id": "et-art-240#0",
                "sourceDocId": "et-art-240",
                "text": "Tarifa general para personas jurídicas.",
                "similarityScore": 0.82,
                "rerankScore": 0.91,
                "metadata": {
                    "title": "Artículo 240",
                    "category": "estatuto",
                    "legalState": "vigente",
                    "chunkIndex": 0,
                    "totalChunks": 2,
                    "libro": "Libro I"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(chunk.chunk.source_doc_id, "et-art-240");
        assert_eq!(chunk.chunk.metadata.legal_state, LegalState::Current);
        assert_eq!(chunk.chunk.metadata.total_chunks, 2);
        assert_eq!(
            chunk.chunk.metadata.extra.get("libro"),
            Some(&Value::String("Libro I".to_string()))
        );
        assert!((chunk.score() - 0.91).abs() < f32::EPSILON);
    }
}
