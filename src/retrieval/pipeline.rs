use super::{deduplicate_chunks, Query, Reranker, SearchError, VectorSearch};
use crate::config::RetrievalConfig;
use crate::context::{AssembledContext, Chunk, ContextAssembler};
use crate::embedding::EmbeddingCache;
use crate::ratelimit::RateLimiter;
use crate::router::NamespaceRouter;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a retrieval request
#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    /// The client is over its request budget
    Throttled { retry_after: u64 },
    Assembled(AssembledContext),
}

/// End-to-end query path: rate gate, routing, embedding, fan-out search,
/// merge, rerank and context assembly
pub struct RetrievalPipeline {
    limiter: Arc<RateLimiter>,
    router: Arc<NamespaceRouter>,
    cache: Arc<EmbeddingCache>,
    search: Arc<dyn VectorSearch>,
    reranker: Arc<dyn Reranker>,
    assembler: Arc<ContextAssembler>,
    top_k_per_collection: usize,
    top_k: usize,
}

impl RetrievalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limiter: Arc<RateLimiter>,
        router: Arc<NamespaceRouter>,
        cache: Arc<EmbeddingCache>,
        search: Arc<dyn VectorSearch>,
        reranker: Arc<dyn Reranker>,
        assembler: Arc<ContextAssembler>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            limiter,
            router,
            cache,
            search,
            reranker,
            assembler,
            top_k_per_collection: config.top_k_per_collection,
            top_k: config.top_k,
        }
    }

    /// Collections to search, with their merge weights
    fn plan(&self, query: &Query) -> Vec<(String, f32)> {
        match &query.collection {
            Some(collection) => vec![(collection.clone(), 1.0)],
            None => self
                .router
                .prioritize_collections(&query.text)
                .into_iter()
                .enumerate()
                .map(|(position, collection)| (collection, self.router.merge_weight(position)))
                .collect(),
        }
    }

    pub async fn retrieve(&self, client: &str, query: &Query) -> Result<RetrievalOutcome, SearchError> {
        let decision = self.limiter.check(client);
        if !decision.allowed {
            return Ok(RetrievalOutcome::Throttled {
                retry_after: decision.retry_after.unwrap_or(1),
            });
        }

        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        let plan = self.plan(query);
        let vector = self.cache.embed_query(&query.embedding_text()).await?;

        let mut candidates: Vec<Chunk> = Vec::new();
        for (collection, weight) in &plan {
            let mut chunks = self
                .search
                .query(
                    collection,
                    &vector,
                    self.top_k_per_collection,
                    query.filter.as_ref(),
                )
                .await?;
            debug!(collection = %collection, weight, hits = chunks.len(), "collection searched");
            for chunk in &mut chunks {
                chunk.similarity_score *= weight;
            }
            candidates.extend(chunks);
        }

        // stable: equal scores keep collection priority order
        candidates.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut candidates = deduplicate_chunks(candidates);
        let chunks_retrieved = candidates.len();
        candidates.truncate(self.top_k);

        let ranked = self.reranker.rerank(&query.text, candidates).await?;
        let context = self.assembler.assemble(&ranked, chunks_retrieved);

        info!(
            client,
            collections = plan.len(),
            retrieved = chunks_retrieved,
            articles = context.articles.len(),
            tokens = context.debug.tokens_used,
            "query answered"
        );

        Ok(RetrievalOutcome::Assembled(context))
    }
}
