//! Deterministic execution ordering.
//!
//! Kahn's algorithm over the subgraph induced by a chosen set of edge types.
//! Among nodes that become ready at the same time the lexicographically
//! smallest ID is emitted first, so identical graphs always produce
//! identical plans.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::{debug, warn};

use strata_core::error::{Result, StrataError};

use crate::model::Graph;

/// Adjacency restricted to allowed edge types, with deterministic iteration.
struct Induced<'g> {
    nodes: BTreeSet<&'g str>,
    successors: BTreeMap<&'g str, Vec<&'g str>>,
}

impl<'g> Induced<'g> {
    /// Nodes touched by at least one allowed edge, and those edges.
    fn build(graph: &'g Graph, allowed: &HashSet<&str>) -> Self {
        let mut nodes = BTreeSet::new();
        let mut successors: BTreeMap<&'g str, Vec<&'g str>> = BTreeMap::new();

        for from in graph.node_ids() {
            for edge in graph.edges_from(from) {
                if !allowed.contains(edge.edge_type.as_str()) {
                    continue;
                }
                if !graph.contains(&edge.to) {
                    warn!(from, to = %edge.to, edge_type = %edge.edge_type, "Skipping edge to missing node");
                    continue;
                }
                nodes.insert(from);
                nodes.insert(edge.to.as_str());
                successors.entry(from).or_default().push(edge.to.as_str());
            }
        }
        Self { nodes, successors }
    }

    /// Keep only nodes reachable from `roots` (roots included).
    fn restrict_to_reachable(mut self, roots: &[&'g str]) -> Self {
        let mut reachable: BTreeSet<&'g str> = BTreeSet::new();
        let mut queue: VecDeque<&'g str> = roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(next) = self.successors.get(id) {
                queue.extend(next.iter().copied());
            }
        }
        self.successors.retain(|from, _| reachable.contains(from));
        self.nodes = reachable;
        self
    }

    fn successors_of(&self, id: &str) -> &[&'g str] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn order(&self) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self.nodes.iter().map(|n| (*n, 0)).collect();
        for targets in self.successors.values() {
            for to in targets {
                if let Some(d) = in_degree.get_mut(to) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for to in self.successors_of(id) {
                if let Some(d) = in_degree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*to);
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
            let remaining: BTreeSet<&str> = self
                .nodes
                .iter()
                .copied()
                .filter(|n| !emitted.contains(n))
                .collect();
            let cycle = self.find_cycle(&remaining);
            warn!(cycle = %cycle.join(" -> "), unplanned = remaining.len(), "Plan aborted by cycle");
            return Err(StrataError::CyclicDependency { nodes: cycle });
        }

        Ok(order)
    }

    /// Extract one concrete cycle from the nodes Kahn's algorithm left behind.
    ///
    /// Every leftover node still has a leftover predecessor, so walking
    /// predecessors must revisit a node; the walk from that node on is a cycle.
    fn find_cycle(&self, remaining: &BTreeSet<&'g str>) -> Vec<String> {
        let mut predecessors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (from, targets) in &self.successors {
            if !remaining.contains(from) {
                continue;
            }
            for to in targets {
                if remaining.contains(to) {
                    predecessors.entry(*to).or_default().insert(*from);
                }
            }
        }

        let Some(start) = remaining.iter().next().copied() else {
            return vec![];
        };
        let mut path: Vec<&str> = vec![start];
        let mut current = start;
        loop {
            let Some(prev) = predecessors.get(current).and_then(|p| p.iter().next().copied()) else {
                return path.iter().rev().map(|s| s.to_string()).collect();
            };
            if let Some(pos) = path.iter().position(|n| *n == prev) {
                // path holds the walk backwards; reverse it into edge direction and close the loop.
                let mut cycle: Vec<String> = path[pos..].iter().rev().map(|s| s.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            path.push(prev);
            current = prev;
        }
    }
}

fn allowed_set<S: AsRef<str>>(edge_types: &[S]) -> HashSet<&str> {
    edge_types.iter().map(|t| t.as_ref()).collect()
}

/// Order every node touched by an edge whose type is in `edge_types`, so that
/// for each such edge `A -> B`, `A` precedes `B`.
pub fn plan<S: AsRef<str>>(graph: &Graph, edge_types: &[S]) -> Result<Vec<String>> {
    let allowed = allowed_set(edge_types);
    let order = Induced::build(graph, &allowed).order()?;
    debug!(nodes = order.len(), edge_types = allowed.len(), "Plan computed");
    Ok(order)
}

/// Order the nodes reachable from `roots` over allowed edges, roots included.
pub fn plan_from<R: AsRef<str>, S: AsRef<str>>(
    graph: &Graph,
    roots: &[R],
    edge_types: &[S],
) -> Result<Vec<String>> {
    let mut root_ids = Vec::with_capacity(roots.len());
    for root in roots {
        let root = root.as_ref();
        let node = graph
            .node(root)
            .ok_or_else(|| StrataError::NodeNotFound(root.to_string()))?;
        root_ids.push(node.id.as_str());
    }

    let allowed = allowed_set(edge_types);
    let order = Induced::build(graph, &allowed)
        .restrict_to_reachable(&root_ids)
        .order()?;
    debug!(roots = root_ids.len(), nodes = order.len(), "Scoped plan computed");
    Ok(order)
}
