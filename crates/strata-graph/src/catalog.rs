use std::sync::Arc;

use tracing::info;

use strata_core::error::Result;
use strata_core::types::{edge_types, kinds, status, Node};

use crate::platform::{EdgeOutcome, PlatformGraph};

/// Metadata key recording who created a catalog entity.
pub const CREATED_BY: &str = "created_by";

/// Typed operations over the platform's entity kinds.
///
/// Every helper is a thin composition of `PlatformGraph` primitives, so all
/// edges still pass through the installed policy validator.
#[derive(Clone)]
pub struct Catalog {
    graph: Arc<PlatformGraph>,
    actor: Option<String>,
    autosave: bool,
}

impl Catalog {
    pub fn new(graph: Arc<PlatformGraph>) -> Self {
        Self {
            graph,
            actor: None,
            autosave: false,
        }
    }

    /// Save the graph after every successful mutation.
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    /// A view of this catalog that stamps `actor` into `created_by`.
    pub fn as_actor(&self, actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..self.clone()
        }
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn graph(&self) -> &Arc<PlatformGraph> {
        &self.graph
    }

    fn stamp(&self, node: Node) -> Node {
        match &self.actor {
            Some(actor) => node.with_metadata(CREATED_BY, actor.as_str()),
            None => node,
        }
    }

    async fn commit(&self) -> Result<()> {
        if self.autosave {
            self.graph.save().await?;
        }
        Ok(())
    }

    async fn put(&self, node: Node) -> Result<Node> {
        let node = self.stamp(node);
        self.graph.add_node(node.clone()).await?;
        self.commit().await?;
        Ok(node)
    }

    /// Upsert `node` together with its edge to `target`; neither lands on failure.
    async fn put_linked(&self, node: Node, target: &str, edge_type: &str) -> Result<Node> {
        let node = self.stamp(node);
        self.graph.attach_to(node.clone(), target, edge_type).await?;
        self.commit().await?;
        Ok(node)
    }

    async fn link(&self, from: &str, to: &str, edge_type: &str) -> Result<EdgeOutcome> {
        let outcome = self.graph.add_edge(from, to, edge_type).await?;
        if outcome == EdgeOutcome::Created {
            self.commit().await?;
        }
        Ok(outcome)
    }

    pub async fn create_application(&self, name: &str) -> Result<Node> {
        let node = self.put(Node::new(name, kinds::APPLICATION)).await?;
        info!(application = name, "Application created");
        Ok(node)
    }

    pub async fn create_environment(&self, name: &str) -> Result<Node> {
        let node = self.put(Node::new(name, kinds::ENVIRONMENT)).await?;
        info!(environment = name, "Environment created");
        Ok(node)
    }

    /// Let `application` deploy into `environment`.
    pub async fn allow_environment(&self, application: &str, environment: &str) -> Result<EdgeOutcome> {
        self.link(application, environment, edge_types::ALLOWED_IN).await
    }

    /// Create a service owned by `application`.
    pub async fn create_service(&self, application: &str, name: &str) -> Result<Node> {
        let node = self.stamp(Node::new(name, kinds::SERVICE).with_metadata("application", application));
        self.graph
            .attach_node(application, node.clone(), edge_types::OWNS)
            .await?;
        self.commit().await?;
        info!(application, service = name, "Service created");
        Ok(node)
    }

    /// Create `<service>:<version>` linked from its service.
    pub async fn create_service_version(&self, service: &str, version: &str) -> Result<Node> {
        let id = format!("{}:{}", service, version);
        let node = self.stamp(
            Node::new(id.as_str(), kinds::SERVICE_VERSION)
                .with_metadata("service", service)
                .with_metadata("version", version),
        );
        self.graph
            .attach_node(service, node.clone(), edge_types::HAS_VERSION)
            .await?;
        self.commit().await?;
        info!(service, version = %id, "Service version created");
        Ok(node)
    }

    pub async fn create_resource_type(&self, name: &str) -> Result<Node> {
        self.put(Node::new(name, kinds::RESOURCE_TYPE)).await
    }

    /// Create a resource, bootstrapping its type node if it does not exist yet.
    pub async fn create_resource(&self, name: &str, resource_type: &str) -> Result<Node> {
        if !self.graph.contains(resource_type).await {
            self.create_resource_type(resource_type).await?;
        }
        let node = self
            .put_linked(
                Node::new(name, kinds::RESOURCE).with_metadata("resource_type", resource_type),
                resource_type,
                edge_types::INSTANCE_OF,
            )
            .await?;
        info!(resource = name, resource_type, "Resource created");
        Ok(node)
    }

    /// Record that `consumer` uses `resource`.
    pub async fn use_resource(&self, consumer: &str, resource: &str) -> Result<EdgeOutcome> {
        self.link(consumer, resource, edge_types::USES).await
    }

    /// Record a deployment of `version` into `environment`, subject to policy.
    pub async fn deploy(&self, version: &str, environment: &str) -> Result<EdgeOutcome> {
        let outcome = self.link(version, environment, edge_types::DEPLOYED_IN).await?;
        info!(version, environment, ?outcome, "Deployment recorded");
        Ok(outcome)
    }

    /// Create a policy that gates `environment`. Inactive policies are stored as pending.
    pub async fn create_policy(&self, name: &str, environment: &str, active: bool) -> Result<Node> {
        let state = if active { status::ACTIVE } else { status::PENDING };
        let node = self
            .put_linked(
                Node::new(name, kinds::POLICY).with_metadata(status::KEY, state),
                environment,
                edge_types::ENFORCES,
            )
            .await?;
        Ok(node)
    }

    /// Record a check result that `satisfies` `target` on behalf of `subject`.
    ///
    /// `target` is either a policy node (for enforced policies) or the deploying
    /// entity itself (for promotion prerequisites, scoped by `environment`).
    pub async fn record_check(
        &self,
        name: &str,
        target: &str,
        subject: &str,
        environment: Option<&str>,
        succeeded: bool,
    ) -> Result<Node> {
        let state = if succeeded { status::SUCCEEDED } else { status::PENDING };
        let mut node = Node::new(name, kinds::CHECK)
            .with_metadata(status::KEY, state)
            .with_metadata("subject", subject);
        if let Some(env) = environment {
            node = node.with_metadata("environment", env);
        }
        let node = self.put_linked(node, target, edge_types::SATISFIES).await?;
        info!(check = name, target, subject, state, "Check recorded");
        Ok(node)
    }

    /// Declare that deploying into `environment` requires `prerequisite` first.
    pub async fn environment_requires(&self, environment: &str, prerequisite: &str) -> Result<EdgeOutcome> {
        self.link(environment, prerequisite, edge_types::REQUIRES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyChain;
    use crate::testing::VecBackend;
    use strata_core::config::PolicyConfig;
    use strata_core::error::StrataError;

    fn catalog() -> Catalog {
        let graph = PlatformGraph::with_validator(
            Arc::new(VecBackend::default()),
            Arc::new(PolicyChain::from_config(&PolicyConfig::default())),
        );
        Catalog::new(Arc::new(graph))
    }

    async fn app_with_service(catalog: &Catalog) {
        catalog.create_application("app").await.unwrap();
        catalog.create_service("app", "svc").await.unwrap();
        catalog.create_environment("dev").await.unwrap();
        catalog.create_environment("prod").await.unwrap();
        catalog.allow_environment("app", "dev").await.unwrap();
        catalog.allow_environment("app", "prod").await.unwrap();
        catalog.create_service_version("svc", "1.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_scenario_end_to_end() {
        let catalog = catalog();
        app_with_service(&catalog).await;

        let err = catalog.deploy("svc:1.0", "prod").await.unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { ref rule, .. } if rule == "promotion"));

        assert_eq!(catalog.deploy("svc:1.0", "dev").await.unwrap(), EdgeOutcome::Created);
        assert_eq!(catalog.deploy("svc:1.0", "prod").await.unwrap(), EdgeOutcome::Created);

        let order = catalog
            .graph()
            .plan(&[edge_types::OWNS, edge_types::HAS_VERSION, edge_types::DEPLOYED_IN])
            .await
            .unwrap();
        let at = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(at("app") < at("svc"));
        assert!(at("svc") < at("svc:1.0"));
        assert!(at("svc:1.0") < at("dev"));
        assert!(at("svc:1.0") < at("prod"));
    }

    #[tokio::test]
    async fn test_service_version_id_and_links() {
        let catalog = catalog();
        app_with_service(&catalog).await;

        let graph = catalog.graph();
        let version = graph.require_node("svc:1.0").await.unwrap();
        assert_eq!(version.kind, kinds::SERVICE_VERSION);
        assert_eq!(version.meta_str("version"), Some("1.0"));
        assert!(graph.read(|g| g.has_edge("svc", "svc:1.0", edge_types::HAS_VERSION)).await);
        assert!(graph.read(|g| g.has_edge("app", "svc", edge_types::OWNS)).await);
    }

    #[tokio::test]
    async fn test_service_needs_existing_application() {
        let catalog = catalog();
        let err = catalog.create_service("ghost", "svc").await.unwrap_err();
        assert!(matches!(err, StrataError::NodeNotFound(ref id) if id == "ghost"));
        assert!(!catalog.graph().contains("svc").await);
    }

    #[tokio::test]
    async fn test_actor_stamped_into_metadata() {
        let catalog = catalog().as_actor("alice@example.com");
        let node = catalog.create_application("app").await.unwrap();
        assert_eq!(node.meta_str(CREATED_BY), Some("alice@example.com"));

        let stored = catalog.graph().require_node("app").await.unwrap();
        assert_eq!(stored.meta_str(CREATED_BY), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_resource_bootstraps_type() {
        let catalog = catalog();
        app_with_service(&catalog).await;

        catalog.create_resource("orders-db", "postgres").await.unwrap();
        catalog.use_resource("svc", "orders-db").await.unwrap();

        let graph = catalog.graph();
        assert_eq!(graph.require_node("postgres").await.unwrap().kind, kinds::RESOURCE_TYPE);
        assert!(graph
            .read(|g| g.has_edge("orders-db", "postgres", edge_types::INSTANCE_OF))
            .await);
        assert_eq!(
            catalog.use_resource("svc", "orders-db").await.unwrap(),
            EdgeOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_enforced_policy_blocks_until_check_succeeds() {
        let catalog = catalog();
        app_with_service(&catalog).await;
        catalog.deploy("svc:1.0", "dev").await.unwrap();
        catalog.create_policy("sec-scan", "prod", true).await.unwrap();

        let err = catalog.deploy("svc:1.0", "prod").await.unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { ref rule, .. } if rule == "enforced_policy"));

        catalog
            .record_check("scan-svc-1", "sec-scan", "svc:1.0", None, true)
            .await
            .unwrap();
        catalog.deploy("svc:1.0", "prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_check_satisfies_promotion_prerequisite() {
        let catalog = catalog();
        app_with_service(&catalog).await;

        catalog
            .record_check("dev-soak", "svc:1.0", "svc:1.0", Some("dev"), true)
            .await
            .unwrap();
        catalog.deploy("svc:1.0", "prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_environment_requires_edge() {
        let catalog = catalog();
        app_with_service(&catalog).await;
        catalog.create_environment("staging").await.unwrap();
        catalog.allow_environment("app", "staging").await.unwrap();
        catalog.environment_requires("staging", "dev").await.unwrap();

        assert!(catalog.deploy("svc:1.0", "staging").await.is_err());
        catalog.deploy("svc:1.0", "dev").await.unwrap();
        catalog.deploy("svc:1.0", "staging").await.unwrap();
    }

    #[tokio::test]
    async fn test_autosave_after_mutations() {
        let backend = Arc::new(VecBackend::default());
        let graph = Arc::new(PlatformGraph::new(backend.clone()));
        let catalog = Catalog::new(graph).with_autosave(true);

        catalog.create_application("app").await.unwrap();
        catalog.create_environment("dev").await.unwrap();
        catalog.allow_environment("app", "dev").await.unwrap();
        assert_eq!(backend.save_count(), 3);

        // Re-adding an existing edge changes nothing and does not save.
        catalog.allow_environment("app", "dev").await.unwrap();
        assert_eq!(backend.save_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_link_leaves_no_orphan_node() {
        let backend = Arc::new(VecBackend::default());
        let graph = Arc::new(PlatformGraph::new(backend.clone()));
        let catalog = Catalog::new(graph.clone()).with_autosave(true);

        let err = catalog
            .create_policy("sec-scan", "no-such-env", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::NodeNotFound(ref id) if id == "no-such-env"));
        assert!(!graph.contains("sec-scan").await);

        let err = catalog
            .record_check("chk", "ghost", "svc:1.0", None, true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!graph.contains("chk").await);
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_resource_is_rolled_back() {
        struct DenyInstances;

        impl crate::policy::PolicyValidator for DenyInstances {
            fn name(&self) -> &str {
                "deny_instances"
            }

            fn validate(&self, _graph: &crate::model::Graph, _from: &str, _to: &str, edge_type: &str) -> Result<()> {
                if edge_type == edge_types::INSTANCE_OF {
                    return Err(StrataError::policy("deny_instances", "no new instances"));
                }
                Ok(())
            }
        }

        let graph = Arc::new(PlatformGraph::with_validator(
            Arc::new(VecBackend::default()),
            Arc::new(DenyInstances),
        ));
        let catalog = Catalog::new(graph.clone());

        let err = catalog.create_resource("orders-db", "postgres").await.unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { .. }));
        assert!(!graph.contains("orders-db").await);
        assert!(graph.contains("postgres").await);
    }
}
