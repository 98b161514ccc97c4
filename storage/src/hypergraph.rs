use hyperrec_core::error::{ErrorCode, HyperrecError};
use hyperrec_core::model::{now_millis, EdgeId, HyperEdge, HyperNode, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("id must not be empty")]
    EmptyId,
    #[error("edge {edge_id} references unknown node {node_id}")]
    UnknownNode { edge_id: EdgeId, node_id: NodeId },
    #[error("edge {0} must connect at least two distinct nodes")]
    TooFewMembers(EdgeId),
    #[error("edge {0} has a non-finite weight")]
    InvalidWeight(EdgeId),
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("adjacency entry {key} holds node {node_id}")]
    MismatchedEntry { key: NodeId, node_id: NodeId },
}

impl HyperrecError for GraphError {
    fn error_code(&self) -> ErrorCode {
        match self {
            GraphError::NodeNotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::InvalidArgument,
        }
    }
}

/// Typed, n-ary weighted hypergraph.
///
/// Nodes and edges live in two arenas keyed by id. Every relationship (type membership and
/// node-to-edge incidence) is a derived index over those ids and is maintained on each
/// mutation. Edges are validated on insert: every member must already be a known node.
#[derive(Debug, Clone)]
pub struct Hypergraph {
    market_id: String,
    nodes: BTreeMap<NodeId, HyperNode>,
    edges: BTreeMap<EdgeId, HyperEdge>,
    node_type_index: HashMap<String, BTreeSet<NodeId>>,
    edge_type_index: HashMap<String, BTreeSet<EdgeId>>,
    node_edges: HashMap<NodeId, BTreeSet<EdgeId>>,
    market_embedding: Option<Vec<f32>>,
}

impl Default for Hypergraph {
    fn default() -> Self {
        Self::new("global")
    }
}

impl Hypergraph {
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            node_type_index: HashMap::new(),
            edge_type_index: HashMap::new(),
            node_edges: HashMap::new(),
            market_embedding: None,
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn market_embedding(&self) -> Option<&[f32]> {
        self.market_embedding.as_deref()
    }

    pub fn set_market_embedding(&mut self, embedding: Option<Vec<f32>>) {
        self.market_embedding = embedding;
    }

    /// Inserts or replaces a node. A replaced node keeps its original creation time.
    pub fn add_node(&mut self, mut node: HyperNode) -> Result<Option<HyperNode>, GraphError> {
        if node.id.trim().is_empty() {
            return Err(GraphError::EmptyId);
        }

        let previous = self.nodes.remove(&node.id);
        if let Some(old) = &previous {
            self.unindex_node_type(old);
            node.created_at = old.created_at;
            node.updated_at = now_millis().max(old.updated_at);
        }

        self.node_type_index
            .entry(node.node_type().to_string())
            .or_default()
            .insert(node.id.clone());
        self.node_edges.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);

        Ok(previous)
    }

    /// Inserts or replaces a hyperedge after validating its members.
    ///
    /// Member ids are deduplicated in order of first appearance.
    pub fn add_edge(&mut self, mut edge: HyperEdge) -> Result<&HyperEdge, GraphError> {
        self.validate_edge(&mut edge)?;

        if let Some(old) = self.edges.remove(&edge.id) {
            self.unindex_edge(&old);
        }
        self.index_edge(&edge);

        let id = edge.id.clone();
        let edge = self.edges.entry(id).or_insert(edge);
        Ok(edge)
    }

    fn validate_edge(&self, edge: &mut HyperEdge) -> Result<(), GraphError> {
        if edge.id.trim().is_empty() {
            return Err(GraphError::EmptyId);
        }
        if !edge.weight.is_finite() {
            return Err(GraphError::InvalidWeight(edge.id.clone()));
        }

        let mut seen = BTreeSet::new();
        edge.node_ids.retain(|id| seen.insert(id.clone()));
        if edge.node_ids.len() < 2 {
            return Err(GraphError::TooFewMembers(edge.id.clone()));
        }

        if let Some(missing) = edge.node_ids.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(GraphError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: missing.clone(),
            });
        }
        Ok(())
    }

    fn index_edge(&mut self, edge: &HyperEdge) {
        self.edge_type_index
            .entry(edge.edge_type.clone())
            .or_default()
            .insert(edge.id.clone());
        for node_id in &edge.node_ids {
            self.node_edges
                .entry(node_id.clone())
                .or_default()
                .insert(edge.id.clone());
        }
    }

    fn unindex_edge(&mut self, edge: &HyperEdge) {
        if let Some(ids) = self.edge_type_index.get_mut(&edge.edge_type) {
            ids.remove(&edge.id);
            if ids.is_empty() {
                self.edge_type_index.remove(&edge.edge_type);
            }
        }
        for node_id in &edge.node_ids {
            if let Some(ids) = self.node_edges.get_mut(node_id) {
                ids.remove(&edge.id);
            }
        }
    }

    fn unindex_node_type(&mut self, node: &HyperNode) {
        if let Some(ids) = self.node_type_index.get_mut(node.node_type()) {
            ids.remove(&node.id);
            if ids.is_empty() {
                self.node_type_index.remove(node.node_type());
            }
        }
    }

    pub fn node(&self, id: &str) -> Option<&HyperNode> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&HyperEdge> {
        self.edges.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HyperNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes_by_type(&self, node_type: &str) -> Vec<&HyperNode> {
        self.node_type_index
            .get(node_type)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn edges_by_type(&self, edge_type: &str) -> Vec<&HyperEdge> {
        self.edge_type_index
            .get(edge_type)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn edges_for_node(&self, node_id: &str) -> Vec<&HyperEdge> {
        self.node_edges
            .get(node_id)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Distinct nodes sharing at least one hyperedge with `node_id`, optionally restricted
    /// to the given edge types. Sorted by id.
    pub fn neighbors(&self, node_id: &str, edge_types: Option<&[&str]>) -> Vec<&HyperNode> {
        let mut ids: BTreeSet<&NodeId> = BTreeSet::new();
        for edge in self.edges_for_node(node_id) {
            if let Some(types) = edge_types {
                if !types.contains(&edge.edge_type.as_str()) {
                    continue;
                }
            }
            ids.extend(edge.node_ids.iter().filter(|id| id.as_str() != node_id));
        }
        ids.into_iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    /// True when the two nodes are members of a common hyperedge.
    pub fn are_connected(&self, a: &str, b: &str) -> bool {
        match (self.node_edges.get(a), self.node_edges.get(b)) {
            (Some(left), Some(right)) => {
                let (small, large) = if left.len() <= right.len() {
                    (left, right)
                } else {
                    (right, left)
                };
                small.iter().any(|id| large.contains(id))
            }
            _ => false,
        }
    }

    pub fn to_adjacency_list(&self) -> AdjacencyDocument {
        let adjacency = self
            .nodes
            .values()
            .map(|node| {
                let entry = AdjacencyEntry {
                    node: node.clone(),
                    edges: self
                        .node_edges
                        .get(&node.id)
                        .map(|ids| ids.iter().cloned().collect())
                        .unwrap_or_default(),
                    neighbors: self
                        .neighbors(&node.id, None)
                        .into_iter()
                        .map(|n| n.id.clone())
                        .collect(),
                };
                (node.id.clone(), entry)
            })
            .collect();

        AdjacencyDocument {
            market_id: self.market_id.clone(),
            adjacency,
            edges: self.edges.values().cloned().collect(),
            market_embedding: self.market_embedding.clone(),
        }
    }

    /// Rebuilds a graph from an adjacency document. The per-node `edges` and `neighbors`
    /// lists are derived data and are recomputed from the edge list.
    pub fn from_adjacency_list(doc: AdjacencyDocument) -> Result<Self, GraphError> {
        let mut graph = Hypergraph::new(doc.market_id);
        graph.market_embedding = doc.market_embedding;

        for (key, entry) in doc.adjacency {
            if key != entry.node.id {
                return Err(GraphError::MismatchedEntry {
                    key,
                    node_id: entry.node.id,
                });
            }
            let node = entry.node;
            graph
                .node_type_index
                .entry(node.node_type().to_string())
                .or_default()
                .insert(node.id.clone());
            graph.node_edges.entry(node.id.clone()).or_default();
            graph.nodes.insert(node.id.clone(), node);
        }

        for edge in doc.edges {
            graph.add_edge(edge)?;
        }

        Ok(graph)
    }

    /// Returns the nodes and edges matching `filter` without touching the graph.
    pub fn query_with_filters(&self, filter: &GraphFilter) -> GraphView<'_> {
        let nodes = self
            .nodes
            .values()
            .filter(|node| filter.matches_node(node))
            .collect();
        let edges = self
            .edges
            .values()
            .filter(|edge| filter.matches_edge(edge))
            .collect();
        GraphView { nodes, edges }
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            market_id: self.market_id.clone(),
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            node_type_counts: self
                .node_type_index
                .iter()
                .map(|(t, ids)| (t.clone(), ids.len()))
                .collect(),
            edge_type_counts: self
                .edge_type_index
                .iter()
                .map(|(t, ids)| (t.clone(), ids.len()))
                .collect(),
            has_market_embedding: self.market_embedding.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyEntry {
    pub node: HyperNode,
    #[serde(default)]
    pub edges: Vec<EdgeId>,
    #[serde(default)]
    pub neighbors: Vec<NodeId>,
}

/// Serialized form of a hypergraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyDocument {
    pub market_id: String,
    pub adjacency: BTreeMap<NodeId, AdjacencyEntry>,
    pub edges: Vec<HyperEdge>,
    #[serde(default)]
    pub market_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphFilter {
    #[serde(default)]
    pub node_types: Option<Vec<String>>,
    #[serde(default)]
    pub edge_types: Option<Vec<String>>,
    /// Attribute equality constraints on nodes (typed attributes, then extensions).
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub from_millis: Option<i64>,
    #[serde(default)]
    pub to_millis: Option<i64>,
}

impl GraphFilter {
    pub fn with_node_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_edge_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn created_between(mut self, from_millis: Option<i64>, to_millis: Option<i64>) -> Self {
        self.from_millis = from_millis;
        self.to_millis = to_millis;
        self
    }

    fn matches_node(&self, node: &HyperNode) -> bool {
        if let Some(types) = &self.node_types {
            if !types.iter().any(|t| t == node.node_type()) {
                return false;
            }
        }
        if self
            .attributes
            .iter()
            .any(|(key, expected)| node.attribute(key).as_ref() != Some(expected))
        {
            return false;
        }
        if self.from_millis.is_some_and(|from| node.created_at < from) {
            return false;
        }
        if self.to_millis.is_some_and(|to| node.created_at > to) {
            return false;
        }
        true
    }

    fn matches_edge(&self, edge: &HyperEdge) -> bool {
        match &self.edge_types {
            Some(types) => types.iter().any(|t| *t == edge.edge_type),
            None => true,
        }
    }
}

/// Borrowed result of [`Hypergraph::query_with_filters`].
#[derive(Debug, Clone)]
pub struct GraphView<'a> {
    pub nodes: Vec<&'a HyperNode>,
    pub edges: Vec<&'a HyperEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub market_id: String,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_type_counts: BTreeMap<String, usize>,
    pub edge_type_counts: BTreeMap<String, usize>,
    pub has_market_embedding: bool,
}
