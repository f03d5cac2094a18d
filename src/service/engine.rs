use super::ipc::{IpcMessage, IpcResponse, DEFAULT_CLIENT};
use crate::config::{expand_tilde, Config, RetrievalConfig};
use crate::context::{render_context, ContextAssembler, RerankedChunk};
use crate::embedding::{self, EmbeddingCache};
use crate::error::Result;
use crate::graph::{normalize_document_id, CitationGraph};
use crate::ratelimit::RateLimiter;
use crate::retrieval::{build_reranker, RetrievalPipeline, VectorSearch};
use crate::router::NamespaceRouter;
use serde_json::json;
use std::sync::Arc;

/// Shared request-handling state, built once at service start
pub struct Engine {
    pub cache: Arc<EmbeddingCache>,
    pub router: Arc<NamespaceRouter>,
    pub graph: Arc<CitationGraph>,
    pub assembler: Arc<ContextAssembler>,
    pub limiter: Arc<RateLimiter>,
}

impl Engine {
    /// Build every component from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = Arc::new(embedding::build_cache(&config.embedding)?);
        let graph = Arc::new(CitationGraph::load_or_empty(&expand_tilde(&config.graph.path))?);
        Self::with_parts(config, cache, graph)
    }

    /// Build the remaining components around an existing cache and graph
    pub fn with_parts(
        config: &Config,
        cache: Arc<EmbeddingCache>,
        graph: Arc<CitationGraph>,
    ) -> Result<Self> {
        let router = Arc::new(NamespaceRouter::from_config(&config.router)?);
        let assembler = Arc::new(ContextAssembler::new(Arc::clone(&graph), &config.context));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Ok(Self {
            cache,
            router,
            graph,
            assembler,
            limiter,
        })
    }

    /// Query path over these components and a vector store backend.
    /// The reranker follows `config.enable_reranking`.
    pub fn retrieval_pipeline(
        &self,
        search: Arc<dyn VectorSearch>,
        config: &RetrievalConfig,
    ) -> Result<RetrievalPipeline> {
        let reranker = build_reranker(config)?;
        Ok(RetrievalPipeline::new(
            Arc::clone(&self.limiter),
            Arc::clone(&self.router),
            Arc::clone(&self.cache),
            search,
            reranker,
            Arc::clone(&self.assembler),
            config,
        ))
    }

    /// Rejection response when `client` is over its budget
    fn gate(&self, client: Option<&str>) -> Option<IpcResponse> {
        let decision = self.limiter.check(client.unwrap_or(DEFAULT_CLIENT));
        if decision.allowed {
            None
        } else {
            Some(IpcResponse::throttled(decision.retry_after.unwrap_or(1)))
        }
    }

    /// Answer one request. `Stop` is acknowledged here and acted on by the
    /// accept loop.
    pub async fn handle(&self, message: IpcMessage) -> IpcResponse {
        match message {
            IpcMessage::Status => IpcResponse::success("Service is running"),
            IpcMessage::Stop => IpcResponse::success("Shutdown initiated"),
            IpcMessage::Stats => IpcResponse::success_with_data(json!({
                "cache": self.cache.stats(),
                "rate_limit": self.limiter.stats(),
                "graph": self.graph.stats(),
                "collections": self.router.collections(),
            })),
            IpcMessage::Route { query } => self.route(&query),
            IpcMessage::Lookup { document, client } => {
                if let Some(rejected) = self.gate(client.as_deref()) {
                    return rejected;
                }
                to_response(&self.graph.lookup(&document))
            }
            IpcMessage::Related { ids } => {
                let ids: Vec<String> = ids.iter().map(|id| normalize_document_id(id)).collect();
                let related: Vec<_> = self
                    .graph
                    .get_related_context(&ids)
                    .iter()
                    .map(|edge| {
                        json!({
                            "edge": edge,
                            "summary": self.graph.summarize(edge),
                        })
                    })
                    .collect();
                IpcResponse::success_with_data(json!({ "ids": ids, "related": related }))
            }
            IpcMessage::Assemble {
                chunks,
                chunks_retrieved,
                client,
            } => {
                if let Some(rejected) = self.gate(client.as_deref()) {
                    return rejected;
                }
                self.assemble(&chunks, chunks_retrieved)
            }
            IpcMessage::Embed { texts, client } => {
                if let Some(rejected) = self.gate(client.as_deref()) {
                    return rejected;
                }
                match self.cache.embed_queries(&texts).await {
                    Ok(vectors) => IpcResponse::success_with_data(json!({
                        "model": self.cache.provider().model_name(),
                        "dimension": self.cache.provider().dimension(),
                        "vectors": vectors,
                    })),
                    Err(e) => IpcResponse::error(format!("Embedding failed: {}", e)),
                }
            }
        }
    }

    fn route(&self, query: &str) -> IpcResponse {
        let classifier = self.router.classify(query).map(|c| c.name.clone());
        let collections: Vec<_> = self
            .router
            .prioritize_collections(query)
            .into_iter()
            .enumerate()
            .map(|(position, collection)| {
                json!({
                    "collection": collection,
                    "weight": self.router.merge_weight(position),
                })
            })
            .collect();

        IpcResponse::success_with_data(json!({
            "classifier": classifier,
            "collections": collections,
        }))
    }

    fn assemble(&self, chunks: &[RerankedChunk], chunks_retrieved: Option<usize>) -> IpcResponse {
        let context = self
            .assembler
            .assemble(chunks, chunks_retrieved.unwrap_or(chunks.len()));
        let rendered = render_context(&context);
        match serde_json::to_value(&context) {
            Ok(value) => IpcResponse::success_with_data(json!({
                "context": value,
                "rendered": rendered,
            })),
            Err(e) => IpcResponse::error(format!("Failed to serialize context: {}", e)),
        }
    }
}

fn to_response<T: serde::Serialize>(value: &T) -> IpcResponse {
    match serde_json::to_value(value) {
        Ok(data) => IpcResponse::success_with_data(data),
        Err(e) => IpcResponse::error(format!("Failed to serialize response: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedOptions, EmbeddingError, EmbeddingProvider, ProviderOutput};
    use crate::context::{Chunk, ChunkMetadata, LegalState};
    use crate::error::LexError;
    use crate::graph::{CitationGraphData, GraphEdge, GraphNode, NodeType, Relation};
    use crate::retrieval::{Query, RetrievalOutcome, SearchError, SearchFilter};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct UnitProvider;

    #[async_trait]
    impl EmbeddingProvider for UnitProvider {
        async fn embed(
            &self,
            texts: &[String],
            _options: EmbedOptions,
        ) -> std::result::Result<ProviderOutput, EmbeddingError> {
            Ok(ProviderOutput::Dense(vec![vec![0.5; 3]; texts.len()]))
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "unit"
        }
    }

    fn engine(max_requests: usize) -> Engine {
        let mut config = Config::default();
        config.rate_limit.max_requests = max_requests;
        let graph = CitationGraph::new(CitationGraphData {
            nodes: vec![GraphNode {
                id: "ley-2277-2022".to_string(),
                node_type: NodeType::Law,
                label: "Ley 2277 de 2022".to_string(),
            }],
            edges: vec![GraphEdge {
                source_id: "ley-2277-2022".to_string(),
                target_id: "et-art-240".to_string(),
                relation: Relation::Modifies,
            }],
        });
        let cache = Arc::new(EmbeddingCache::new(Arc::new(UnitProvider), 10, true));
        Engine::with_parts(&config, cache, Arc::new(graph)).unwrap()
    }

    #[tokio::test]
    async fn test_route_reports_priority_and_weights() {
        let response = engine(5)
            .handle(IpcMessage::Route {
                query: "sentencia de la corte constitucional".to_string(),
            })
            .await;

        let data = response.data.unwrap();
        assert_eq!(data["classifier"], "jurisprudencia");
        assert_eq!(data["collections"][0]["collection"], "jurisprudencia");
        assert_eq!(data["collections"][1]["collection"], "estatuto");
    }

    #[tokio::test]
    async fn test_related_normalizes_ids() {
        let response = engine(5)
            .handle(IpcMessage::Related {
                ids: vec!["Art. 240 ET".to_string()],
            })
            .await;

        let data = response.data.unwrap();
        assert_eq!(data["ids"][0], "et-art-240");
        assert_eq!(data["related"][0]["edge"]["related_id"], "ley-2277-2022");
        assert_eq!(data["related"][0]["summary"]["label"], "Ley 2277 de 2022");
    }

    #[tokio::test]
    async fn test_lookup_is_rate_limited_per_client() {
        let engine = engine(1);
        let lookup = |client: &str| IpcMessage::Lookup {
            document: "et-art-240".to_string(),
            client: Some(client.to_string()),
        };

        assert!(engine.handle(lookup("a")).await.success);
        let rejected = engine.handle(lookup("a")).await;
        assert!(!rejected.success);
        assert!(rejected.retry_after().unwrap() >= 1);
        assert!(engine.handle(lookup("b")).await.success);
    }

    #[tokio::test]
    async fn test_embed_goes_through_cache() {
        let engine = engine(10);
        let message = IpcMessage::Embed {
            texts: vec!["tarifa".to_string()],
            client: None,
        };

        let response = engine.handle(message.clone()).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap()["dimension"], 3);

        engine.handle(message).await;
        let stats = engine.cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    /// Every collection holds the same article
    struct SingleArticleSearch;

    #[async_trait]
    impl VectorSearch for SingleArticleSearch {
        async fn query(
            &self,
            _collection: &str,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<&SearchFilter>,
        ) -> std::result::Result<Vec<Chunk>, SearchError> {
            Ok(vec![Chunk {
                id: "et-art-240#0".to_string(),
                source_doc_id: "et-art-240".to_string(),
                text: "Tarifa general para personas jurídicas.".to_string(),
                metadata: ChunkMetadata {
                    title: "Artículo 240".to_string(),
                    category: "estatuto".to_string(),
                    legal_state: LegalState::Current,
                    chunk_index: 0,
                    total_chunks: 1,
                    source_url: None,
                    extra: BTreeMap::new(),
                },
                similarity_score: 0.9,
            }])
        }
    }

    #[tokio::test]
    async fn test_retrieval_pipeline_from_engine() {
        let engine = engine(10);
        let config = Config::default().retrieval;
        let pipeline = engine
            .retrieval_pipeline(Arc::new(SingleArticleSearch), &config)
            .unwrap();

        match pipeline.retrieve("local", &Query::new("tarifa de renta")).await.unwrap() {
            RetrievalOutcome::Assembled(context) => {
                assert_eq!(context.articles.len(), 1);
                assert_eq!(context.articles[0].id, "et-art-240");
                assert_eq!(context.articles[0].related.len(), 1);
            }
            RetrievalOutcome::Throttled { .. } => panic!("unexpected throttle"),
        }
        // the pipeline shares the engine's cache
        assert_eq!(engine.cache.stats().misses, 1);
    }

    #[test]
    fn test_retrieval_pipeline_honours_reranking_flag() {
        let engine = engine(10);
        let mut config = Config::default().retrieval;
        config.enable_reranking = true;
        config.reranker_model = "no-such-model".to_string();

        let result = engine.retrieval_pipeline(Arc::new(SingleArticleSearch), &config);
        assert!(matches!(result, Err(LexError::Rerank(_))));
    }
}
