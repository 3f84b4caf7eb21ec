use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use strata_core::error::{Result, StrataError};
use strata_core::traits::GraphBackend;
use strata_core::types::{Edge, GraphSnapshot, Node};

use crate::model::Graph;
use crate::planner;
use crate::policy::PolicyValidator;

/// Result of an idempotent edge insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The edge was appended.
    Created,
    /// The identical edge already existed; nothing changed.
    Unchanged,
}

/// Which end of an attach edge the new node sits on.
#[derive(Clone, Copy)]
enum Direction {
    FromAnchor,
    ToAnchor,
}

/// The process-wide platform graph.
///
/// Owns the node/edge model behind one read/write lock, the snapshot
/// backend, and the installed policy validator. All structural mutation goes
/// through this type; readers see every committed change immediately.
pub struct PlatformGraph {
    inner: RwLock<Graph>,
    backend: Arc<dyn GraphBackend>,
    validator: Option<Arc<dyn PolicyValidator>>,
}

impl PlatformGraph {
    /// Create an empty graph with no policy installed.
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            inner: RwLock::new(Graph::new()),
            backend,
            validator: None,
        }
    }

    /// Create an empty graph that consults `validator` on every edge.
    pub fn with_validator(backend: Arc<dyn GraphBackend>, validator: Arc<dyn PolicyValidator>) -> Self {
        Self {
            inner: RwLock::new(Graph::new()),
            backend,
            validator: Some(validator),
        }
    }

    /// Create a graph and populate it from the backend.
    pub async fn open(
        backend: Arc<dyn GraphBackend>,
        validator: Option<Arc<dyn PolicyValidator>>,
    ) -> Result<Self> {
        let graph = Self {
            inner: RwLock::new(Graph::new()),
            backend,
            validator,
        };
        graph.load().await?;
        Ok(graph)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Insert or replace a node. Returns true if the ID was new.
    pub async fn add_node(&self, node: Node) -> Result<bool> {
        validate_id("node id", &node.id)?;
        validate_id("node kind", &node.kind)?;
        let id = node.id.clone();
        let kind = node.kind.clone();
        let created = self.inner.write().await.upsert_node(node).is_none();
        debug!(node = %id, kind = %kind, created, "Node upserted");
        Ok(created)
    }

    /// Add `from -[edge_type]-> to`.
    ///
    /// Fails with `NodeNotFound` when an endpoint is missing and with
    /// `PolicyViolation` when the validator rejects the edge. Re-adding an
    /// existing edge is a no-op reported as `EdgeOutcome::Unchanged`.
    pub async fn add_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<EdgeOutcome> {
        validate_id("edge type", edge_type)?;
        let mut graph = self.inner.write().await;
        require_endpoints(&graph, from, to)?;

        if graph.has_edge(from, to, edge_type) {
            debug!(from, to, edge_type, "Edge already present");
            return Ok(EdgeOutcome::Unchanged);
        }

        if let Some(validator) = &self.validator {
            validator.validate(&graph, from, to, edge_type)?;
        }
        graph.insert_edge(from, Edge::new(to, edge_type));
        info!(from, to, edge_type, "Edge created");
        Ok(EdgeOutcome::Created)
    }

    /// Like `add_edge`, but an existing identical edge is a `DuplicateEdge` error.
    pub async fn add_unique_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<()> {
        match self.add_edge(from, to, edge_type).await? {
            EdgeOutcome::Created => Ok(()),
            EdgeOutcome::Unchanged => Err(StrataError::DuplicateEdge {
                from: from.to_string(),
                to: to.to_string(),
                edge_type: edge_type.to_string(),
            }),
        }
    }

    /// Upsert `node` and link `parent -[edge_type]-> node` in one critical section.
    ///
    /// If the policy rejects the edge, the node change is rolled back.
    pub async fn attach_node(&self, parent: &str, node: Node, edge_type: &str) -> Result<EdgeOutcome> {
        self.attach(node, parent, edge_type, Direction::FromAnchor).await
    }

    /// Upsert `node` and link `node -[edge_type]-> target` in one critical section.
    ///
    /// A missing `target` or a policy rejection leaves the graph unchanged.
    pub async fn attach_to(&self, node: Node, target: &str, edge_type: &str) -> Result<EdgeOutcome> {
        self.attach(node, target, edge_type, Direction::ToAnchor).await
    }

    async fn attach(&self, node: Node, anchor: &str, edge_type: &str, direction: Direction) -> Result<EdgeOutcome> {
        validate_id("node id", &node.id)?;
        validate_id("node kind", &node.kind)?;
        validate_id("edge type", edge_type)?;

        let mut graph = self.inner.write().await;
        if !graph.contains(anchor) {
            return Err(StrataError::NodeNotFound(anchor.to_string()));
        }

        let child = node.id.clone();
        let (from, to) = match direction {
            Direction::FromAnchor => (anchor, child.as_str()),
            Direction::ToAnchor => (child.as_str(), anchor),
        };
        let previous = graph.upsert_node(node);
        if graph.has_edge(from, to, edge_type) {
            return Ok(EdgeOutcome::Unchanged);
        }

        if let Some(validator) = &self.validator {
            if let Err(e) = validator.validate(&graph, from, to, edge_type) {
                match previous {
                    Some(prev) => {
                        graph.upsert_node(prev);
                    }
                    None => {
                        graph.remove_node(&child);
                    }
                }
                return Err(e);
            }
        }
        graph.insert_edge(from, Edge::new(to, edge_type));
        info!(from, to, edge_type, "Node attached");
        Ok(EdgeOutcome::Created)
    }

    /// Run endpoint checks and the validator without committing anything.
    pub async fn check_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<()> {
        let graph = self.inner.read().await;
        require_endpoints(&graph, from, to)?;
        if graph.has_edge(from, to, edge_type) {
            return Ok(());
        }
        match &self.validator {
            Some(validator) => validator.validate(&graph, from, to, edge_type),
            None => Ok(()),
        }
    }

    pub async fn node(&self, id: &str) -> Option<Node> {
        self.inner.read().await.node(id).cloned()
    }

    /// Like `node`, but a missing node is a `NodeNotFound` error.
    pub async fn require_node(&self, id: &str) -> Result<Node> {
        self.node(id)
            .await
            .ok_or_else(|| StrataError::NodeNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains(id)
    }

    pub async fn edges_from(&self, id: &str) -> Vec<Edge> {
        self.inner.read().await.edges_from(id).to_vec()
    }

    pub async fn nodes_of_kind(&self, kind: &str) -> Vec<Node> {
        self.inner
            .read()
            .await
            .nodes_of_kind(kind)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Run `f` against a consistent view of the graph.
    pub async fn read<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        let graph = self.inner.read().await;
        f(&graph)
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.inner.read().await.to_snapshot()
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.edge_count()
    }

    /// Topological order over edges of the given types.
    pub async fn plan<S: AsRef<str>>(&self, edge_types: &[S]) -> Result<Vec<String>> {
        let graph = self.inner.read().await;
        planner::plan(&graph, edge_types)
    }

    /// Topological order of the nodes reachable from `roots`.
    pub async fn plan_from<R: AsRef<str>, S: AsRef<str>>(
        &self,
        roots: &[R],
        edge_types: &[S],
    ) -> Result<Vec<String>> {
        let graph = self.inner.read().await;
        planner::plan_from(&graph, roots, edge_types)
    }

    /// Persist the current state. The lock is held only while copying.
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        self.backend.save(&snapshot).await?;
        info!(
            backend = self.backend.name(),
            nodes = snapshot.nodes.len(),
            edges = snapshot.edge_count(),
            "Graph saved"
        );
        Ok(())
    }

    /// Replace the in-memory state with the backend's snapshot.
    pub async fn load(&self) -> Result<()> {
        let snapshot = self.backend.load().await?;
        let nodes = snapshot.nodes.len();
        let edges = snapshot.edge_count();
        *self.inner.write().await = Graph::from_snapshot(snapshot);
        info!(backend = self.backend.name(), nodes, edges, "Graph loaded");
        Ok(())
    }
}

fn validate_id(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StrataError::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn require_endpoints(graph: &Graph, from: &str, to: &str) -> Result<()> {
    for id in [from, to] {
        if !graph.contains(id) {
            return Err(StrataError::NodeNotFound(id.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyChain;
    use crate::testing::VecBackend;
    use strata_core::config::PolicyConfig;
    use strata_core::types::{edge_types, kinds};

    fn policed() -> PlatformGraph {
        PlatformGraph::with_validator(
            Arc::new(VecBackend::default()),
            Arc::new(PolicyChain::from_config(&PolicyConfig::default())),
        )
    }

    async fn seed(graph: &PlatformGraph) {
        graph.add_node(Node::new("app", kinds::APPLICATION)).await.unwrap();
        graph.add_node(Node::new("svc", kinds::SERVICE)).await.unwrap();
        graph.add_node(Node::new("svc:1.0", kinds::SERVICE_VERSION)).await.unwrap();
        graph.add_node(Node::new("dev", kinds::ENVIRONMENT)).await.unwrap();
        graph.add_node(Node::new("prod", kinds::ENVIRONMENT)).await.unwrap();
        graph.add_edge("app", "svc", edge_types::OWNS).await.unwrap();
        graph.add_edge("svc", "svc:1.0", edge_types::HAS_VERSION).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_node_upserts() {
        let graph = PlatformGraph::new(Arc::new(VecBackend::default()));
        assert!(graph.add_node(Node::new("a", "thing")).await.unwrap());
        assert!(!graph
            .add_node(Node::new("a", "thing").with_metadata("v", 2))
            .await
            .unwrap());
        assert_eq!(graph.node_count().await, 1);
        assert_eq!(graph.node("a").await.unwrap().metadata["v"], 2);
    }

    #[tokio::test]
    async fn test_add_node_rejects_empty_id() {
        let graph = PlatformGraph::new(Arc::new(VecBackend::default()));
        let err = graph.add_node(Node::new("  ", "thing")).await.unwrap_err();
        assert!(matches!(err, StrataError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_edge_requires_both_endpoints() {
        let graph = PlatformGraph::new(Arc::new(VecBackend::default()));
        graph.add_node(Node::new("a", "thing")).await.unwrap();

        let err = graph.add_edge("a", "missing", "uses").await.unwrap_err();
        assert!(matches!(err, StrataError::NodeNotFound(ref id) if id == "missing"));
        let err = graph.add_edge("missing", "a", "uses").await.unwrap_err();
        assert!(matches!(err, StrataError::NodeNotFound(ref id) if id == "missing"));
        assert_eq!(graph.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_edge_is_idempotent() {
        let graph = PlatformGraph::new(Arc::new(VecBackend::default()));
        graph.add_node(Node::new("a", "thing")).await.unwrap();
        graph.add_node(Node::new("b", "thing")).await.unwrap();

        assert_eq!(graph.add_edge("a", "b", "uses").await.unwrap(), EdgeOutcome::Created);
        assert_eq!(graph.add_edge("a", "b", "uses").await.unwrap(), EdgeOutcome::Unchanged);
        assert_eq!(graph.edges_from("a").await.len(), 1);

        let err = graph.add_unique_edge("a", "b", "uses").await.unwrap_err();
        assert!(matches!(err, StrataError::DuplicateEdge { .. }));
    }

    #[tokio::test]
    async fn test_policy_gate_on_allowed_in() {
        let graph = policed();
        seed(&graph).await;

        let err = graph
            .add_edge("svc:1.0", "dev", edge_types::DEPLOYED_IN)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { .. }));
        assert!(graph.edges_from("svc:1.0").await.is_empty());

        graph.add_edge("app", "dev", edge_types::ALLOWED_IN).await.unwrap();
        graph
            .add_edge("svc:1.0", "dev", edge_types::DEPLOYED_IN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_check_edge_does_not_commit() {
        let graph = policed();
        seed(&graph).await;
        graph.add_edge("app", "dev", edge_types::ALLOWED_IN).await.unwrap();

        graph.check_edge("svc:1.0", "dev", edge_types::DEPLOYED_IN).await.unwrap();
        assert!(graph.edges_from("svc:1.0").await.is_empty());
        assert!(graph
            .check_edge("svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_attach_node_restores_replaced_node_on_rejection() {
        let graph = policed();
        seed(&graph).await;

        let rejected = graph
            .attach_node(
                "svc:1.0",
                Node::new("prod", kinds::ENVIRONMENT).with_metadata("tier", "gold"),
                edge_types::DEPLOYED_IN,
            )
            .await
            .unwrap_err();
        assert!(matches!(rejected, StrataError::PolicyViolation { .. }));
        assert!(graph.node("prod").await.unwrap().metadata.is_empty());

        let created = graph
            .attach_node("svc", Node::new("svc:2.0", kinds::SERVICE_VERSION), edge_types::HAS_VERSION)
            .await
            .unwrap();
        assert_eq!(created, EdgeOutcome::Created);
        assert!(graph.contains("svc:2.0").await);
    }

    #[tokio::test]
    async fn test_attach_node_removes_new_node_on_rejection() {
        let graph = policed();
        seed(&graph).await;

        let err = graph
            .attach_node("svc:1.0", Node::new("qa", kinds::ENVIRONMENT), edge_types::DEPLOYED_IN)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { .. }));
        assert!(!graph.contains("qa").await);
    }

    #[tokio::test]
    async fn test_attach_to_commits_node_and_edge_together() {
        let graph = policed();
        seed(&graph).await;

        let err = graph
            .attach_to(Node::new("scan", kinds::CHECK), "ghost", edge_types::SATISFIES)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::NodeNotFound(ref id) if id == "ghost"));
        assert!(!graph.contains("scan").await);

        let err = graph
            .attach_to(Node::new("svc:2.0", kinds::SERVICE_VERSION), "prod", edge_types::DEPLOYED_IN)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { .. }));
        assert!(!graph.contains("svc:2.0").await);

        let outcome = graph
            .attach_to(Node::new("scan", kinds::CHECK), "svc:1.0", edge_types::SATISFIES)
            .await
            .unwrap();
        assert_eq!(outcome, EdgeOutcome::Created);
        assert!(graph.read(|g| g.has_edge("scan", "svc:1.0", edge_types::SATISFIES)).await);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let backend = Arc::new(VecBackend::default());
        let graph = PlatformGraph::new(backend.clone());
        seed(&graph).await;
        graph.save().await.unwrap();

        let restored = PlatformGraph::open(backend, None).await.unwrap();
        assert_eq!(restored.snapshot().await, graph.snapshot().await);
    }

    #[tokio::test]
    async fn test_load_empty_backend() {
        let graph = PlatformGraph::open(Arc::new(VecBackend::default()), None)
            .await
            .unwrap();
        assert_eq!(graph.node_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_edge_writers_never_duplicate() {
        let graph = Arc::new(PlatformGraph::new(Arc::new(VecBackend::default())));
        graph.add_node(Node::new("a", "thing")).await.unwrap();
        graph.add_node(Node::new("b", "thing")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let g = graph.clone();
            handles.push(tokio::spawn(async move { g.add_edge("a", "b", "uses").await }));
        }
        let mut created = 0;
        for h in handles {
            if h.await.unwrap().unwrap() == EdgeOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(graph.edges_from("a").await.len(), 1);
    }
}
