use std::collections::HashMap;

use strata_core::types::{Edge, GraphSnapshot, Node};

/// In-memory node/edge model.
///
/// Nodes are keyed by ID; edges live in an adjacency list keyed by source ID.
/// The model is kind-agnostic: it never interprets `Node::kind` or
/// `Edge::edge_type`. Mutation is crate-private so that every change goes
/// through `PlatformGraph`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Vec<Edge>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        Self {
            nodes: snapshot.nodes,
            edges: snapshot.edges,
        }
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node IDs in lexicographic order.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// All nodes of one kind, ordered by ID.
    pub fn nodes_of_kind(&self, kind: &str) -> Vec<&Node> {
        let mut found: Vec<&Node> = self.nodes.values().filter(|n| n.kind == kind).collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Outgoing edges of `from`, in insertion order.
    pub fn edges_from(&self, from: &str) -> &[Edge] {
        self.edges.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(source, edge)` pair whose edge points at `to`, ordered by source.
    pub fn incoming(&self, to: &str) -> Vec<(&str, &Edge)> {
        let mut found: Vec<(&str, &Edge)> = self
            .edges
            .iter()
            .flat_map(|(from, edges)| {
                edges
                    .iter()
                    .filter(move |e| e.to == to)
                    .map(move |e| (from.as_str(), e))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.edge_type.cmp(&b.1.edge_type)));
        found
    }

    pub fn has_edge(&self, from: &str, to: &str, edge_type: &str) -> bool {
        self.edges_from(from)
            .iter()
            .any(|e| e.to == to && e.edge_type == edge_type)
    }

    /// Targets reached from `from` over edges of `edge_type`.
    pub fn targets(&self, from: &str, edge_type: &str) -> Vec<&str> {
        self.edges_from(from)
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Sources pointing at `to` over edges of `edge_type`, ordered by ID.
    pub fn sources(&self, to: &str, edge_type: &str) -> Vec<&str> {
        self.incoming(to)
            .into_iter()
            .filter(|(_, e)| e.edge_type == edge_type)
            .map(|(from, _)| from)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Insert or replace a node. Existing edges are kept. Returns the previous node.
    pub(crate) fn upsert_node(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    /// Drop a node without touching edges; only used to undo a rejected attach.
    pub(crate) fn remove_node(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }

    /// Append an edge unless the identical triple exists. Returns true if appended.
    pub(crate) fn insert_edge(&mut self, from: &str, edge: Edge) -> bool {
        let list = self.edges.entry(from.to_string()).or_default();
        if list.contains(&edge) {
            return false;
        }
        list.push(edge);
        true
    }
}
