use super::{
    estimate_tokens, ArticleBlock, AssembledContext, Citation, DebugInfo, RerankedChunk,
};
use crate::config::ContextConfig;
use crate::graph::{CitationGraph, RelatedSummary};
use ahash::{AHashMap, AHashSet};
use std::sync::Arc;
use tracing::debug;

/// Chunks of one source document collected from the ranked input
struct DocumentGroup<'a> {
    chunks: Vec<&'a RerankedChunk>,
    chunk_indices: AHashSet<u32>,
    best: &'a RerankedChunk,
    best_rank: usize,
}

/// Builds the per-document context handed to the prompt builder
pub struct ContextAssembler {
    graph: Arc<CitationGraph>,
    token_budget: usize,
    graph_top_documents: usize,
    max_related_per_article: usize,
}

impl ContextAssembler {
    pub fn new(graph: Arc<CitationGraph>, config: &ContextConfig) -> Self {
        Self {
            graph,
            token_budget: config.token_budget,
            graph_top_documents: config.graph_top_documents,
            max_related_per_article: config.max_related_per_article,
        }
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Fold ranked chunks into at most one block per document, in the rank of
    /// each document's best chunk, and stop before the first block that
    /// would overflow the token budget.
    ///
    /// `chunks_retrieved` is the candidate count before reranking and is
    /// only reported back in the debug counters.
    pub fn assemble(&self, ranked: &[RerankedChunk], chunks_retrieved: usize) -> AssembledContext {
        let groups = group_by_document(ranked);
        let chunks_kept: usize = groups.iter().map(|g| g.chunks.len()).sum();
        let unique_articles = groups.len();

        let top_ids: Vec<String> = groups
            .iter()
            .take(self.graph_top_documents)
            .map(|g| g.best.chunk.source_doc_id.clone())
            .collect();
        let mut related = self.related_by_document(&top_ids);

        let mut articles = Vec::new();
        let mut tokens_used = 0;
        let mut budget_exhausted = false;

        for group in groups {
            let mut block = build_block(group);
            block.related = related.remove(&block.id).unwrap_or_default();
            block.estimated_tokens = estimate_tokens(&block.budget_text());

            if tokens_used + block.estimated_tokens > self.token_budget {
                debug!(
                    id = %block.id,
                    tokens = block.estimated_tokens,
                    used = tokens_used,
                    budget = self.token_budget,
                    "token budget reached"
                );
                budget_exhausted = true;
                break;
            }

            tokens_used += block.estimated_tokens;
            articles.push(block);
        }

        let mut seen = AHashSet::new();
        let sources: Vec<Citation> = articles
            .iter()
            .filter(|a| seen.insert(a.id.clone()))
            .map(|a| Citation {
                id: a.id.clone(),
                title: a.title.clone(),
                legal_state: a.legal_state,
                link: a.link.clone(),
            })
            .collect();

        let debug_info = DebugInfo {
            chunks_retrieved,
            chunks_after_reranking: chunks_kept,
            unique_articles,
            articles_included: articles.len(),
            tokens_used,
            budget_exhausted,
        };

        debug!(
            retrieved = debug_info.chunks_retrieved,
            kept = debug_info.chunks_after_reranking,
            unique = debug_info.unique_articles,
            included = debug_info.articles_included,
            tokens = debug_info.tokens_used,
            "context assembled"
        );

        AssembledContext {
            articles,
            sources,
            debug: debug_info,
        }
    }

    fn related_by_document(&self, ids: &[String]) -> AHashMap<String, Vec<RelatedSummary>> {
        let mut by_document: AHashMap<String, Vec<RelatedSummary>> = AHashMap::new();
        if self.max_related_per_article == 0 || ids.is_empty() {
            return by_document;
        }

        for edge in self.graph.get_related_context(ids) {
            let entry = by_document.entry(edge.source_id.clone()).or_default();
            if entry.len() < self.max_related_per_article {
                entry.push(self.graph.summarize(&edge));
            }
        }
        by_document
    }
}

/// Group chunks by source document, ordered by the rank of each document's
/// highest-scoring chunk. A repeated chunk id or chunk index keeps its first
/// occurrence.
fn group_by_document(ranked: &[RerankedChunk]) -> Vec<DocumentGroup<'_>> {
    let mut position: AHashMap<&str, usize> = AHashMap::new();
    let mut chunk_ids: AHashSet<&str> = AHashSet::new();
    let mut groups: Vec<DocumentGroup<'_>> = Vec::new();

    for (rank, chunk) in ranked.iter().enumerate() {
        if !chunk_ids.insert(chunk.chunk.id.as_str()) {
            continue;
        }
        let doc_id = chunk.chunk.source_doc_id.as_str();
        match position.get(doc_id) {
            Some(&i) => {
                let group = &mut groups[i];
                if !group.chunk_indices.insert(chunk.chunk.metadata.chunk_index) {
                    continue;
                }
                group.chunks.push(chunk);
                if chunk.score() > group.best.score() {
                    group.best = chunk;
                    group.best_rank = rank;
                }
            }
            None => {
                position.insert(doc_id, groups.len());
                let mut chunk_indices = AHashSet::new();
                chunk_indices.insert(chunk.chunk.metadata.chunk_index);
                groups.push(DocumentGroup {
                    chunks: vec![chunk],
                    chunk_indices,
                    best: chunk,
                    best_rank: rank,
                });
            }
        }
    }

    groups.sort_by_key(|g| g.best_rank);
    groups
}

fn build_block(mut group: DocumentGroup<'_>) -> ArticleBlock {
    group.chunks.sort_by_key(|c| c.chunk.metadata.chunk_index);

    let text = group
        .chunks
        .iter()
        .map(|c| c.chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let best = &group.best.chunk;
    let link = best
        .metadata
        .source_url
        .clone()
        .or_else(|| {
            group
                .chunks
                .iter()
                .find_map(|c| c.chunk.metadata.source_url.clone())
        })
        .unwrap_or_else(|| default_link(&best.source_doc_id));

    ArticleBlock {
        id: best.source_doc_id.clone(),
        title: best.metadata.title.clone(),
        category: best.metadata.category.clone(),
        legal_state: best.metadata.legal_state,
        link,
        chunk_indices: group
            .chunks
            .iter()
            .map(|c| c.chunk.metadata.chunk_index)
            .collect(),
        text,
        related: Vec::new(),
        score: group.best.score(),
        estimated_tokens: 0,
    }
}

/// In-app route for documents indexed without a source URL
fn default_link(document_id: &str) -> String {
    format!("/documento/{}", document_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Chunk, ChunkMetadata, LegalState};
    use crate::graph::{CitationGraphData, Direction, GraphEdge, GraphNode, NodeType, Relation};
    use std::collections::BTreeMap;

    fn chunk(doc: &str, index: u32, text: &str, score: f32) -> RerankedChunk {
        RerankedChunk::new(
            Chunk {
                id: format!("{}#{}", doc, index),
                source_doc_id: doc.to_string(),
                text: text.to_string(),
                metadata: ChunkMetadata {
                    title: format!("Title {}", doc),
                    category: "estatuto".to_string(),
                    legal_state: LegalState::Current,
                    chunk_index: index,
                    total_chunks: 3,
                    source_url: None,
                    extra: BTreeMap::new(),
                },
                similarity_score: score,
            },
            None,
        )
    }

    fn config(token_budget: usize) -> ContextConfig {
        ContextConfig {
            token_budget,
            graph_top_documents: 5,
            max_related_per_article: 2,
        }
    }

    fn assembler(token_budget: usize) -> ContextAssembler {
        ContextAssembler::new(Arc::new(CitationGraph::empty()), &config(token_budget))
    }

    #[test]
    fn test_one_block_per_document_in_chunk_order() {
        let ranked = vec![
            chunk("et-art-240", 2, "tercero", 0.9),
            chunk("et-art-241", 0, "otro", 0.8),
            chunk("et-art-240", 0, "primero", 0.7),
            chunk("et-art-240", 1, "segundo", 0.6),
        ];

        let ctx = assembler(10_000).assemble(&ranked, 10);

        assert_eq!(ctx.articles.len(), 2);
        assert_eq!(ctx.articles[0].id, "et-art-240");
        assert_eq!(ctx.articles[0].text, "primero\n\nsegundo\n\ntercero");
        assert_eq!(ctx.articles[0].chunk_indices, vec![0, 1, 2]);
        assert_eq!(ctx.articles[1].id, "et-art-241");
        assert_eq!(ctx.debug.chunks_retrieved, 10);
        assert_eq!(ctx.debug.chunks_after_reranking, 4);
        assert_eq!(ctx.debug.unique_articles, 2);
    }

    #[test]
    fn test_order_follows_best_chunk_not_size() {
        // doc-b's best chunk outranks doc-a's even though doc-a appears first
        let mut ranked = vec![
            chunk("doc-a", 0, &"a".repeat(400), 0.5),
            chunk("doc-b", 0, "b", 0.4),
            chunk("doc-b", 1, "b", 0.95),
            chunk("doc-a", 1, &"a".repeat(400), 0.3),
        ];
        ranked[2].rerank_score = Some(0.99);

        let ctx = assembler(10_000).assemble(&ranked, 4);
        let ids: Vec<&str> = ctx.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b"]);
        assert!((ctx.articles[1].score - 0.99).abs() < f32::EPSILON);
    }

    #[test]
    fn test_order_uses_position_of_best_chunk() {
        let ranked = vec![
            chunk("doc-a", 0, "a", 0.9),
            chunk("doc-b", 0, "b", 0.8),
            chunk("doc-c", 0, "c", 0.7),
            chunk("doc-c", 1, "c", 0.95),
        ];

        let ctx = assembler(10_000).assemble(&ranked, 4);
        let ids: Vec<&str> = ctx.articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c"]);
    }

    #[test]
    fn test_duplicate_chunk_merged_once() {
        let ranked = vec![
            chunk("doc-a", 0, "uno", 0.9),
            chunk("doc-a", 0, "uno", 0.5),
        ];

        let ctx = assembler(10_000).assemble(&ranked, 2);
        assert_eq!(ctx.articles[0].text, "uno");
        assert_eq!(ctx.debug.chunks_after_reranking, 1);
    }

    #[test]
    fn test_repeated_chunk_id_merged_once() {
        let mut repeated = chunk("doc-a", 1, "uno", 0.5);
        repeated.chunk.id = "doc-a#0".to_string();
        let ranked = vec![chunk("doc-a", 0, "uno", 0.9), repeated];

        let ctx = assembler(10_000).assemble(&ranked, 2);
        assert_eq!(ctx.articles[0].chunk_indices, vec![0]);
    }

    #[test]
    fn test_budget_stops_before_overflow() {
        // 40, 40 and 40 tokens against a budget of 100
        let ranked = vec![
            chunk("doc-a", 0, &"x".repeat(160), 0.9),
            chunk("doc-b", 0, &"y".repeat(160), 0.8),
            chunk("doc-c", 0, &"z".repeat(160), 0.7),
        ];

        let ctx = assembler(100).assemble(&ranked, 3);

        assert_eq!(ctx.articles.len(), 2);
        assert_eq!(ctx.debug.tokens_used, 80);
        assert!(ctx.debug.budget_exhausted);
        assert_eq!(ctx.debug.unique_articles, 3);
        assert_eq!(ctx.debug.articles_included, 2);
        assert_eq!(ctx.sources.len(), 2);
        assert!(ctx.debug.tokens_used <= 100);
    }

    #[test]
    fn test_budget_does_not_skip_ahead() {
        // a large second document ends assembly even if a later one would fit
        let ranked = vec![
            chunk("doc-a", 0, &"x".repeat(40), 0.9),
            chunk("doc-b", 0, &"y".repeat(4000), 0.8),
            chunk("doc-c", 0, "z", 0.7),
        ];

        let ctx = assembler(50).assemble(&ranked, 3);
        assert_eq!(ctx.articles.len(), 1);
        assert_eq!(ctx.articles[0].id, "doc-a");
    }

    #[test]
    fn test_sources_match_articles() {
        let mut ranked = vec![
            chunk("et-art-240", 0, "texto", 0.9),
            chunk("et-art-241", 0, "texto", 0.8),
        ];
        ranked[1].chunk.metadata.source_url = Some("https://normograma.example/241".to_string());
        ranked[1].chunk.metadata.legal_state = LegalState::Amended;

        let ctx = assembler(10_000).assemble(&ranked, 2);

        assert_eq!(ctx.sources[0].link, "/documento/et-art-240");
        assert_eq!(ctx.sources[1].link, "https://normograma.example/241");
        assert_eq!(ctx.sources[1].legal_state, LegalState::Amended);
    }

    #[test]
    fn test_graph_enrichment_is_bounded_and_separate() {
        let graph = CitationGraph::new(CitationGraphData {
            nodes: vec![GraphNode {
                id: "ley-2277-2022".to_string(),
                node_type: NodeType::Law,
                label: "Ley 2277 de 2022".to_string(),
            }],
            edges: vec![
                GraphEdge {
                    source_id: "ley-2277-2022".to_string(),
                    target_id: "et-art-240".to_string(),
                    relation: Relation::Modifies,
                },
                GraphEdge {
                    source_id: "decreto-1625-2016".to_string(),
                    target_id: "et-art-240".to_string(),
                    relation: Relation::Regulates,
                },
                GraphEdge {
                    source_id: "et-art-240".to_string(),
                    target_id: "et-art-241".to_string(),
                    relation: Relation::Cites,
                },
            ],
        });
        let assembler = ContextAssembler::new(Arc::new(graph), &config(10_000));

        let ranked = vec![chunk("et-art-240", 0, "Tarifa general", 0.9)];
        let ctx = assembler.assemble(&ranked, 1);

        let block = &ctx.articles[0];
        assert_eq!(block.text, "Tarifa general");
        assert_eq!(block.related.len(), 2);
        assert_eq!(block.related[0].label, "Ley 2277 de 2022");
        assert_eq!(block.related[0].direction, Direction::Incoming);
        assert!(block.estimated_tokens > estimate_tokens("Tarifa general"));
    }

    #[test]
    fn test_empty_input() {
        let ctx = assembler(100).assemble(&[], 0);
        assert!(ctx.articles.is_empty());
        assert!(ctx.sources.is_empty());
        assert!(!ctx.debug.budget_exhausted);
    }
}
