//! Citation graph of Colombian tax norms
//!
//! A read-only directed graph (laws modify statute articles, decrees
//! regulate them, rulings cite them) loaded once at startup. Lookups are
//! strictly one hop: an edge is returned when either endpoint is a queried
//! document, and neighbours of neighbours are never visited.

mod normalize;

pub use normalize::normalize_document_id;

use crate::error::{LexError, Result};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Kind of legal document a node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    StatuteArticle,
    Law,
    Decree,
    Resolution,
    Ruling,
}

impl NodeType {
    /// Guess the node type from a canonical id prefix
    pub fn infer(id: &str) -> Option<Self> {
        if id.starts_with("et-art-") {
            Some(NodeType::StatuteArticle)
        } else if id.starts_with("ley-") {
            Some(NodeType::Law)
        } else if id.starts_with("decreto-") {
            Some(NodeType::Decree)
        } else if id.starts_with("resolucion-") {
            Some(NodeType::Resolution)
        } else if id.starts_with("sentencia-") {
            Some(NodeType::Ruling)
        } else {
            None
        }
    }
}

/// Edge label. Unknown tags are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Relation {
    Modifies,
    Cites,
    Regulates,
    Repeals,
    Adds,
    Interprets,
    References,
    Other(String),
}

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Relation::Modifies => "MODIFIES",
            Relation::Cites => "CITES",
            Relation::Regulates => "REGULATES",
            Relation::Repeals => "REPEALS",
            Relation::Adds => "ADDS",
            Relation::Interprets => "INTERPRETS",
            Relation::References => "REFERENCES",
            Relation::Other(tag) => tag,
        }
    }
}

impl From<String> for Relation {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "MODIFIES" => Relation::Modifies,
            "CITES" => Relation::Cites,
            "REGULATES" => Relation::Regulates,
            "REPEALS" => Relation::Repeals,
            "ADDS" => Relation::Adds,
            "INTERPRETS" => Relation::Interprets,
            "REFERENCES" => Relation::References,
            _ => Relation::Other(tag),
        }
    }
}

impl From<Relation> for String {
    fn from(relation: Relation) -> Self {
        relation.as_str().to_string()
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(alias = "source", alias = "sourceId")]
    pub source_id: String,
    #[serde(alias = "target", alias = "targetId")]
    pub target_id: String,
    pub relation: Relation,
}

/// On-disk shape of the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationGraphData {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Which way an edge points, seen from the queried document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One-hop neighbour of a queried document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedEdge {
    /// The queried document
    pub source_id: String,
    /// The document at the other end of the edge
    pub related_id: String,
    pub relation: Relation,
    pub direction: Direction,
}

/// Neighbour description used to enrich a context block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedSummary {
    pub related_id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    pub relation: Relation,
    pub direction: Direction,
}

impl RelatedSummary {
    /// Single-line rendering for prompt text
    pub fn describe(&self) -> String {
        match self.direction {
            Direction::Outgoing => {
                format!("{} → {} [{}]", self.relation, self.label, self.related_id)
            }
            Direction::Incoming => {
                format!("{} [{}] {} →", self.label, self.related_id, self.relation)
            }
        }
    }
}

/// Node as returned to the visualization lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    pub label: String,
    #[serde(default)]
    pub center: bool,
}

/// Node/edge neighbourhood around a single document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub center: String,
    pub nodes: Vec<ViewNode>,
    pub edges: Vec<GraphEdge>,
}

/// Graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub relations: BTreeMap<String, usize>,
}

/// Read-only citation graph with a per-document edge index
pub struct CitationGraph {
    nodes: Vec<GraphNode>,
    node_index: AHashMap<String, usize>,
    edges: Vec<GraphEdge>,
    /// document id -> indices of edges touching it
    adjacency: AHashMap<String, Vec<usize>>,
}

impl CitationGraph {
    /// Build the graph and its indices
    pub fn new(data: CitationGraphData) -> Self {
        let mut node_index = AHashMap::with_capacity(data.nodes.len());
        for (i, node) in data.nodes.iter().enumerate() {
            node_index.insert(node.id.clone(), i);
        }

        let mut adjacency: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (i, edge) in data.edges.iter().enumerate() {
            adjacency.entry(edge.source_id.clone()).or_default().push(i);
            if edge.target_id != edge.source_id {
                adjacency.entry(edge.target_id.clone()).or_default().push(i);
            }
        }

        Self {
            nodes: data.nodes,
            node_index,
            edges: data.edges,
            adjacency,
        }
    }

    pub fn empty() -> Self {
        Self::new(CitationGraphData::default())
    }

    /// Load the graph from a JSON file of `{nodes, edges}`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LexError::Io {
            source: e,
            context: format!("Failed to read citation graph: {:?}", path),
        })?;
        let data: CitationGraphData = serde_json::from_str(&content).map_err(|e| LexError::Json {
            source: e,
            context: format!("Failed to parse citation graph: {:?}", path),
        })?;

        let graph = Self::new(data);
        let stats = graph.stats();
        tracing::info!(
            nodes = stats.node_count,
            edges = stats.edge_count,
            "Citation graph loaded from {:?}",
            path
        );
        Ok(graph)
    }

    /// Load the graph, falling back to an empty one when the file is absent
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Citation graph {:?} not found; graph enrichment disabled",
                path
            );
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Every edge touching one of `document_ids`, seen from that document.
    /// Ordered by input id, then edge declaration order; no duplicates.
    pub fn get_related_context(&self, document_ids: &[String]) -> Vec<RelatedEdge> {
        let mut seen = AHashSet::new();
        let mut related = Vec::new();

        for id in document_ids {
            let Some(edge_ids) = self.adjacency.get(id) else {
                continue;
            };
            for &i in edge_ids {
                let edge = &self.edges[i];
                let (related_id, direction) = if edge.source_id == *id {
                    (&edge.target_id, Direction::Outgoing)
                } else {
                    (&edge.source_id, Direction::Incoming)
                };
                let entry = RelatedEdge {
                    source_id: id.clone(),
                    related_id: related_id.clone(),
                    relation: edge.relation.clone(),
                    direction,
                };
                if seen.insert(entry.clone()) {
                    related.push(entry);
                }
            }
        }

        related
    }

    /// Describe a related edge using the neighbour's node label
    pub fn summarize(&self, edge: &RelatedEdge) -> RelatedSummary {
        let node = self.node(&edge.related_id);
        RelatedSummary {
            related_id: edge.related_id.clone(),
            label: node
                .map(|n| n.label.clone())
                .unwrap_or_else(|| edge.related_id.clone()),
            node_type: node
                .map(|n| n.node_type)
                .or_else(|| NodeType::infer(&edge.related_id)),
            relation: edge.relation.clone(),
            direction: edge.direction,
        }
    }

    /// One-line summaries of at most `limit` neighbours of `id`
    pub fn related_summaries(&self, id: &str, limit: usize) -> Vec<RelatedSummary> {
        self.get_related_context(&[id.to_string()])
            .iter()
            .take(limit)
            .map(|edge| self.summarize(edge))
            .collect()
    }

    /// Neighbourhood of a free-text document reference, with the queried
    /// document as a synthetic center node
    pub fn lookup(&self, raw_id: &str) -> GraphView {
        let id = normalize_document_id(raw_id);

        let center = match self.node(&id) {
            Some(node) => ViewNode {
                id: id.clone(),
                node_type: Some(node.node_type),
                label: node.label.clone(),
                center: true,
            },
            None => ViewNode {
                id: id.clone(),
                node_type: NodeType::infer(&id),
                label: id.clone(),
                center: true,
            },
        };

        let mut nodes = vec![center];
        let mut node_ids: AHashSet<String> = AHashSet::new();
        node_ids.insert(id.clone());

        let mut edges = Vec::new();
        let mut edge_set: AHashSet<&GraphEdge> = AHashSet::new();

        if let Some(edge_ids) = self.adjacency.get(&id) {
            for &i in edge_ids {
                let edge = &self.edges[i];
                if !edge_set.insert(edge) {
                    continue;
                }
                edges.push(edge.clone());

                for endpoint in [&edge.source_id, &edge.target_id] {
                    if node_ids.insert(endpoint.clone()) {
                        nodes.push(self.view_node(endpoint));
                    }
                }
            }
        }

        tracing::debug!(
            id = %id,
            nodes = nodes.len(),
            edges = edges.len(),
            "graph lookup"
        );

        GraphView {
            center: id,
            nodes,
            edges,
        }
    }

    fn view_node(&self, id: &str) -> ViewNode {
        match self.node(id) {
            Some(node) => ViewNode {
                id: node.id.clone(),
                node_type: Some(node.node_type),
                label: node.label.clone(),
                center: false,
            },
            None => ViewNode {
                id: id.to_string(),
                node_type: NodeType::infer(id),
                label: id.to_string(),
                center: false,
            },
        }
    }

    pub fn stats(&self) -> GraphStats {
        let mut relations = BTreeMap::new();
        for edge in &self.edges {
            *relations.entry(edge.relation.to_string()).or_insert(0) += 1;
        }
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            relations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, node_type: NodeType, label: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            node_type,
            label: label.to_string(),
        }
    }

    fn edge(source: &str, target: &str, relation: Relation) -> GraphEdge {
        GraphEdge {
            source_id: source.to_string(),
            target_id: target.to_string(),
            relation,
        }
    }

    fn create_test_graph() -> CitationGraph {
        CitationGraph::new(CitationGraphData {
            nodes: vec![
                node("et-art-240", NodeType::StatuteArticle, "Art. 240 ET - Tarifa general"),
                node("ley-2277-2022", NodeType::Law, "Ley 2277 de 2022"),
                node("decreto-1625-2016", NodeType::Decree, "Decreto 1625 de 2016"),
                node("et-art-241", NodeType::StatuteArticle, "Art. 241 ET"),
            ],
            edges: vec![
                edge("ley-2277-2022", "et-art-240", Relation::Modifies),
                edge("decreto-1625-2016", "et-art-240", Relation::Regulates),
                edge("et-art-240", "et-art-241", Relation::Cites),
                edge("ley-2277-2022", "et-art-241", Relation::Modifies),
            ],
        })
    }

    #[test]
    fn test_incoming_edge_found() {
        let graph = create_test_graph();
        let related = graph.get_related_context(&["et-art-240".to_string()]);

        assert!(related.contains(&RelatedEdge {
            source_id: "et-art-240".to_string(),
            related_id: "ley-2277-2022".to_string(),
            relation: Relation::Modifies,
            direction: Direction::Incoming,
        }));
        assert_eq!(related.len(), 3);
    }

    #[test]
    fn test_one_hop_only() {
        let graph = create_test_graph();
        let related = graph.get_related_context(&["decreto-1625-2016".to_string()]);

        // et-art-240 is one hop away; its other neighbours are not
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].related_id, "et-art-240");
        assert_eq!(related[0].direction, Direction::Outgoing);
    }

    #[test]
    fn test_miss_is_empty() {
        let graph = create_test_graph();
        assert!(graph
            .get_related_context(&["et-art-999".to_string()])
            .is_empty());
    }

    #[test]
    fn test_duplicate_input_ids_deduplicated() {
        let graph = create_test_graph();
        let ids = vec!["et-art-241".to_string(), "et-art-241".to_string()];
        assert_eq!(graph.get_related_context(&ids).len(), 2);
    }

    #[test]
    fn test_unknown_relation_passes_through() {
        let data: CitationGraphData = serde_json::from_str(
            r#"{
                "nodes": [],
                "edges": [{"source": "et-art-1", "target": "et-art-2", "relation": "DEROGA_TACITAMENTE"}]
            }"#,
        )
        .unwrap();
        let graph = CitationGraph::new(data);

        let related = graph.get_related_context(&["et-art-2".to_string()]);
        assert_eq!(
            related[0].relation,
            Relation::Other("DEROGA_TACITAMENTE".to_string())
        );
        assert_eq!(
            serde_json::to_value(&related[0].relation).unwrap(),
            serde_json::json!("DEROGA_TACITAMENTE")
        );
    }

    #[test]
    fn test_lookup_builds_center_node() {
        let graph = create_test_graph();
        let view = graph.lookup("Art. 240 ET");

        assert_eq!(view.center, "et-art-240");
        assert_eq!(view.nodes[0].id, "et-art-240");
        assert!(view.nodes[0].center);
        assert_eq!(view.nodes.iter().filter(|n| n.center).count(), 1);
        assert_eq!(view.nodes.len(), 4);
        assert_eq!(view.edges.len(), 3);
    }

    #[test]
    fn test_lookup_unknown_document() {
        let graph = create_test_graph();
        let view = graph.lookup("Ley 1819 de 2016");

        assert_eq!(view.center, "ley-1819-2016");
        assert_eq!(view.nodes.len(), 1);
        assert_eq!(view.nodes[0].node_type, Some(NodeType::Law));
        assert!(view.edges.is_empty());
    }

    #[test]
    fn test_summaries_use_labels() {
        let graph = create_test_graph();
        let related = graph.get_related_context(&["et-art-240".to_string()]);
        let summary = graph.summarize(&related[0]);

        assert_eq!(summary.label, "Ley 2277 de 2022");
        assert_eq!(summary.node_type, Some(NodeType::Law));
        assert_eq!(
            summary.describe(),
            "Ley 2277 de 2022 [ley-2277-2022] MODIFIES →"
        );
    }

    #[test]
    fn test_related_summaries_limit() {
        let graph = create_test_graph();
        let summaries = graph.related_summaries("et-art-240", 2);

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].label, "Decreto 1625 de 2016");
        assert_eq!(summaries[1].relation, Relation::Regulates);
        assert!(graph.related_summaries("et-art-999", 5).is_empty());
    }

    #[test]
    fn test_stats() {
        let stats = create_test_graph().stats();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 4);
        assert_eq!(stats.relations.get("MODIFIES"), Some(&2));
    }
}
