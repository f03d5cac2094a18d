//! Multi-collection retrieval
//!
//! Vector search and reranking are external collaborators behind traits;
//! this module wires them to the embedding cache, the namespace router,
//! the rate limiter and the context assembler.

mod deduplication;
mod pipeline;
mod reranker;

pub use deduplication::deduplicate_chunks;
pub use pipeline::{RetrievalOutcome, RetrievalPipeline};
pub use reranker::{CrossEncoderReranker, PassThroughReranker, Reranker};

use crate::config::RetrievalConfig;
use crate::context::Chunk;
use crate::embedding::EmbeddingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    #[error("Vector search failed in '{collection}': {message}")]
    VectorSearchError { collection: String, message: String },

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Document the user is looking at when asking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Metadata equality filter forwarded to vector search
pub type SearchFilter = BTreeMap<String, Value>;

/// A user question
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Restricts the search to one collection, bypassing the router
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SearchFilter>,
    /// Prior conversation turns; carried for the prompt builder
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_context: Option<PageContext>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Text sent to the embedding model: the question, plus the title of
    /// the page it was asked from
    pub fn embedding_text(&self) -> String {
        match self.page_context.as_ref().and_then(|p| p.title.as_deref()) {
            Some(title) if !title.trim().is_empty() => format!("{}\n{}", self.text, title.trim()),
            _ => self.text.clone(),
        }
    }
}

/// Per-collection nearest-neighbour search
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Up to `top_k` chunks from `collection`, most similar first
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Chunk>, SearchError>;
}

/// Build the reranker selected by `config.enable_reranking`
pub fn build_reranker(config: &RetrievalConfig) -> Result<Arc<dyn Reranker>, SearchError> {
    if !config.enable_reranking {
        tracing::info!("Reranking disabled, keeping similarity order");
        return Ok(Arc::new(PassThroughReranker));
    }

    let reranker = CrossEncoderReranker::new(&config.reranker_model)?;
    tracing::info!(model = %config.reranker_model, "Reranker initialized");
    Ok(Arc::new(reranker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_appends_page_title() {
        let mut query = Query::new("¿cuál es la tarifa?");
        assert_eq!(query.embedding_text(), "¿cuál es la tarifa?");

        query.page_context = Some(PageContext {
            document_id: Some("et-art-240".to_string()),
            title: Some("Artículo 240. Tarifa general".to_string()),
        });
        assert_eq!(
            query.embedding_text(),
            "¿cuál es la tarifa?\nArtículo 240. Tarifa general"
        );
    }

    #[test]
    fn test_query_deserializes_with_defaults() {
        let query: Query = serde_json::from_str(r#"{"text": "retención en la fuente"}"#).unwrap();
        assert!(query.collection.is_none());
        assert!(query.history.is_empty());
        assert!(query.page_context.is_none());
    }

    fn retrieval_config(enable_reranking: bool, reranker_model: &str) -> RetrievalConfig {
        RetrievalConfig {
            top_k_per_collection: 10,
            top_k: 20,
            enable_reranking,
            reranker_model: reranker_model.to_string(),
        }
    }

    #[test]
    fn test_reranking_flag_off_passes_through() {
        // the model name is never looked at while disabled
        let reranker = build_reranker(&retrieval_config(false, "no-such-model")).unwrap();
        assert!(reranker.model_name().is_none());
    }

    #[test]
    fn test_reranking_flag_on_loads_cross_encoder() {
        let result = build_reranker(&retrieval_config(true, "no-such-model"));
        assert!(matches!(result, Err(SearchError::RerankingError(_))));
    }

    #[test]
    #[ignore] // Requires model download
    fn test_reranking_flag_on_uses_configured_model() {
        let reranker = build_reranker(&retrieval_config(true, "BAAI/bge-reranker-base")).unwrap();
        assert_eq!(reranker.model_name(), Some("BAAI/bge-reranker-base"));
    }
}
