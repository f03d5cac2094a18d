//! Second-pass relevance scoring

use super::SearchError;
use crate::context::{Chunk, RerankedChunk};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;

/// Reorders retrieved chunks by relevance to the question
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Scored chunks, most relevant first
    async fn rerank(&self, query: &str, chunks: Vec<Chunk>)
        -> Result<Vec<RerankedChunk>, SearchError>;

    /// Cross-encoder behind this reranker, if any
    fn model_name(&self) -> Option<&str> {
        None
    }
}

/// Keeps the similarity order and leaves the rerank score unset
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughReranker;

#[async_trait]
impl Reranker for PassThroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<RerankedChunk>, SearchError> {
        Ok(chunks
            .into_iter()
            .map(|chunk| RerankedChunk::new(chunk, None))
            .collect())
    }
}

/// Local cross-encoder reranker
pub struct CrossEncoderReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderReranker {
    /// Load a cross-encoder model.
    ///
    /// Models are downloaded to the fastembed cache on first use.
    /// bge-reranker-v2-m3 is multilingual and suits Spanish text.
    pub fn new(model_name: &str) -> Result<Self, SearchError> {
        let model = match model_name {
            "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(SearchError::RerankingError(format!(
                    "Unsupported reranker model: {}",
                    model_name
                )))
            }
        };

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| SearchError::RerankingError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<RerankedChunk>, SearchError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let results = tokio::task::spawn_blocking(move || model.rerank(query, documents, false, None))
            .await
            .map_err(|e| SearchError::RerankingError(e.to_string()))?
            .map_err(|e| SearchError::RerankingError(e.to_string()))?;

        let mut scores = vec![None; chunks.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = Some(result.score);
            }
        }

        let mut reranked: Vec<RerankedChunk> = chunks
            .into_iter()
            .zip(scores)
            .map(|(chunk, score)| RerankedChunk::new(chunk, score))
            .collect();

        // stable, so ties keep similarity order
        reranked.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(reranked)
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model_name)
    }
}
