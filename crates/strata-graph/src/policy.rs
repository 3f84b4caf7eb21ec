//! Policy gate for structural graph changes.
//!
//! A validator is a predicate over the current graph and a proposed edge.
//! Validators run inside `PlatformGraph::add_edge` while the write lock is
//! held, so a decision is always made against the exact state the edge is
//! committed into. Policy is graph shape: `allowed_in`, `deployed_in`,
//! `requires`, `enforces`, and `satisfies` edges plus `status` metadata on
//! `policy`/`check` nodes.

use std::sync::Arc;

use tracing::{debug, warn};

use strata_core::config::{PolicyConfig, PromotionRule};
use strata_core::error::{Result, StrataError};
use strata_core::types::{edge_types, kinds, status};

use crate::model::Graph;

/// Hook consulted before an edge is committed.
pub trait PolicyValidator: Send + Sync + 'static {
    /// Rule name, reported in `PolicyViolation` errors.
    fn name(&self) -> &str;

    /// Accept (`Ok`) or reject (`Err(PolicyViolation)`) the edge `from -[edge_type]-> to`.
    /// Both endpoints are guaranteed to exist in `graph`.
    fn validate(&self, graph: &Graph, from: &str, to: &str, edge_type: &str) -> Result<()>;
}

/// Ordered list of validators; the first rejection wins.
#[derive(Clone, Default)]
pub struct PolicyChain {
    validators: Vec<Arc<dyn PolicyValidator>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the built-in rules enabled by configuration.
    pub fn from_config(config: &PolicyConfig) -> Self {
        let mut chain = Self::new();
        if config.allow_list {
            chain = chain.with(AllowListRule);
        }
        chain = chain.with(PromotionOrderRule::new(config.promotion.clone()));
        if config.enforce_checks {
            chain = chain.with(EnforcedPolicyRule);
        }
        chain
    }

    pub fn with(mut self, validator: impl PolicyValidator) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn push(&mut self, validator: Arc<dyn PolicyValidator>) {
        self.validators.push(validator);
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Names of installed rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }
}

impl PolicyValidator for PolicyChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn validate(&self, graph: &Graph, from: &str, to: &str, edge_type: &str) -> Result<()> {
        for validator in &self.validators {
            if let Err(e) = validator.validate(graph, from, to, edge_type) {
                warn!(
                    rule = validator.name(),
                    from, to, edge_type,
                    error = %e,
                    "Edge rejected by policy"
                );
                return Err(e);
            }
        }
        debug!(from, to, edge_type, rules = self.validators.len(), "Edge accepted by policy");
        Ok(())
    }
}

/// The service a version belongs to: the `has_version` source, else `service` metadata.
pub fn owning_service(graph: &Graph, version_id: &str) -> Option<String> {
    if let Some(service) = graph.sources(version_id, edge_types::HAS_VERSION).first() {
        return Some(service.to_string());
    }
    graph
        .node(version_id)
        .and_then(|n| n.meta_str("service"))
        .map(str::to_string)
}

/// The application owning a service: the `owns` source, else `application` metadata.
pub fn owning_application_of_service(graph: &Graph, service_id: &str) -> Option<String> {
    let owner = graph
        .sources(service_id, edge_types::OWNS)
        .into_iter()
        .find(|id| graph.node(id).is_some_and(|n| n.is_kind(kinds::APPLICATION)));
    if let Some(app) = owner {
        return Some(app.to_string());
    }
    graph
        .node(service_id)
        .and_then(|n| n.meta_str("application"))
        .map(str::to_string)
}

/// The application ultimately owning a deployable entity.
pub fn owning_application(graph: &Graph, entity_id: &str) -> Option<String> {
    let node = graph.node(entity_id)?;
    match node.kind.as_str() {
        kinds::SERVICE_VERSION => {
            let service = owning_service(graph, entity_id)?;
            owning_application_of_service(graph, &service)
        }
        kinds::SERVICE => owning_application_of_service(graph, entity_id),
        _ => node.meta_str("application").map(str::to_string),
    }
}

/// A `deployed_in` edge from a service version is allowed only into
/// environments the owning application has an `allowed_in` edge to.
pub struct AllowListRule;

impl PolicyValidator for AllowListRule {
    fn name(&self) -> &str {
        "allow_list"
    }

    fn validate(&self, graph: &Graph, from: &str, to: &str, edge_type: &str) -> Result<()> {
        if edge_type != edge_types::DEPLOYED_IN {
            return Ok(());
        }
        let Some(source) = graph.node(from) else {
            return Ok(());
        };
        match source.kind.as_str() {
            kinds::SERVICE_VERSION => {}
            _ => return Ok(()),
        }

        let app = owning_application(graph, from).ok_or_else(|| {
            StrataError::policy(
                self.name(),
                format!("cannot determine the owning application of '{}'", from),
            )
        })?;

        if graph.has_edge(&app, to, edge_types::ALLOWED_IN) {
            Ok(())
        } else {
            Err(StrataError::policy(
                self.name(),
                format!(
                    "application '{}' is not allowed in environment '{}'",
                    app, to
                ),
            ))
        }
    }
}

/// Promotion ordering: deploying into an environment requires a prior
/// deployment of the same entity into each prerequisite environment, or a
/// succeeded `check`/`policy` node that `satisfies` the entity for that
/// prerequisite.
///
/// Prerequisites come from configured rules and from `requires` edges
/// between environment nodes.
pub struct PromotionOrderRule {
    rules: Vec<PromotionRule>,
}

impl PromotionOrderRule {
    pub fn new(rules: Vec<PromotionRule>) -> Self {
        Self { rules }
    }

    fn prerequisites<'g>(&'g self, graph: &'g Graph, environment: &str) -> Vec<&'g str> {
        let mut required: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.environment == environment)
            .map(|r| r.requires.as_str())
            .collect();
        for env in graph.targets(environment, edge_types::REQUIRES) {
            if !required.contains(&env) {
                required.push(env);
            }
        }
        required
    }
}

/// True if a succeeded check/policy node `satisfies` `entity` for `environment`.
/// A satisfying node without an `environment` metadata entry counts for any environment.
fn satisfied_by_check(graph: &Graph, entity: &str, environment: &str) -> bool {
    graph
        .sources(entity, edge_types::SATISFIES)
        .into_iter()
        .filter_map(|id| graph.node(id))
        .filter(|n| n.is_kind(kinds::CHECK) || n.is_kind(kinds::POLICY))
        .filter(|n| n.status() == Some(status::SUCCEEDED))
        .any(|n| n.meta_str("environment").map_or(true, |env| env == environment))
}

impl PolicyValidator for PromotionOrderRule {
    fn name(&self) -> &str {
        "promotion"
    }

    fn validate(&self, graph: &Graph, from: &str, to: &str, edge_type: &str) -> Result<()> {
        if edge_type != edge_types::DEPLOYED_IN {
            return Ok(());
        }
        for required in self.prerequisites(graph, to) {
            let deployed = graph.has_edge(from, required, edge_types::DEPLOYED_IN);
            if deployed || satisfied_by_check(graph, from, required) {
                continue;
            }
            return Err(StrataError::policy(
                self.name(),
                format!(
                    "'{}' must be deployed to '{}' before '{}'",
                    from, required, to
                ),
            ));
        }
        Ok(())
    }
}

/// An active `policy` node that `enforces` an environment blocks deployment
/// into it until a succeeded `check` node `satisfies` the policy with
/// `subject` metadata naming the deploying entity. Pending policies are not
/// yet enforced.
pub struct EnforcedPolicyRule;

impl PolicyValidator for EnforcedPolicyRule {
    fn name(&self) -> &str {
        "enforced_policy"
    }

    fn validate(&self, graph: &Graph, from: &str, to: &str, edge_type: &str) -> Result<()> {
        if edge_type != edge_types::DEPLOYED_IN {
            return Ok(());
        }
        let active_policies = graph
            .sources(to, edge_types::ENFORCES)
            .into_iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| n.is_kind(kinds::POLICY) && n.status() == Some(status::ACTIVE));

        for policy in active_policies {
            let passed = graph
                .sources(&policy.id, edge_types::SATISFIES)
                .into_iter()
                .filter_map(|id| graph.node(id))
                .any(|check| {
                    check.is_kind(kinds::CHECK)
                        && check.status() == Some(status::SUCCEEDED)
                        && check.meta_str("subject") == Some(from)
                });
            if !passed {
                return Err(StrataError::policy(
                    self.name(),
                    format!(
                        "policy '{}' enforced on '{}' has no succeeded check for '{}'",
                        policy.id, to, from
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::types::{Edge, Node};

    /// app owns svc, svc has_version svc:1.0, environments dev/prod.
    fn base() -> Graph {
        let mut g = Graph::new();
        g.upsert_node(Node::new("app", kinds::APPLICATION));
        g.upsert_node(Node::new("svc", kinds::SERVICE));
        g.upsert_node(Node::new("svc:1.0", kinds::SERVICE_VERSION));
        g.upsert_node(Node::new("dev", kinds::ENVIRONMENT));
        g.upsert_node(Node::new("staging", kinds::ENVIRONMENT));
        g.upsert_node(Node::new("prod", kinds::ENVIRONMENT));
        g.insert_edge("app", Edge::new("svc", edge_types::OWNS));
        g.insert_edge("svc", Edge::new("svc:1.0", edge_types::HAS_VERSION));
        g
    }

    fn rule_name(err: StrataError) -> String {
        match err {
            StrataError::PolicyViolation { rule, .. } => rule,
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[test]
    fn test_allow_list_requires_allowed_in() {
        let mut g = base();
        let rule = AllowListRule;

        let err = rule.validate(&g, "svc:1.0", "dev", edge_types::DEPLOYED_IN).unwrap_err();
        assert!(err.to_string().contains("application 'app' is not allowed in environment 'dev'"));

        g.insert_edge("app", Edge::new("dev", edge_types::ALLOWED_IN));
        assert!(rule.validate(&g, "svc:1.0", "dev", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_allow_list_ignores_other_edges_and_kinds() {
        let mut g = base();
        g.upsert_node(Node::new("cache", kinds::RESOURCE));
        let rule = AllowListRule;
        assert!(rule.validate(&g, "svc", "svc:1.0", edge_types::HAS_VERSION).is_ok());
        assert!(rule.validate(&g, "cache", "dev", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_allow_list_falls_back_to_metadata() {
        let mut g = Graph::new();
        g.upsert_node(Node::new("app", kinds::APPLICATION));
        g.upsert_node(Node::new("svc", kinds::SERVICE).with_metadata("application", "app"));
        g.upsert_node(Node::new("svc:2.0", kinds::SERVICE_VERSION).with_metadata("service", "svc"));
        g.upsert_node(Node::new("dev", kinds::ENVIRONMENT));
        g.insert_edge("app", Edge::new("dev", edge_types::ALLOWED_IN));

        assert_eq!(owning_application(&g, "svc:2.0"), Some("app".to_string()));
        assert!(AllowListRule.validate(&g, "svc:2.0", "dev", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_allow_list_unknown_owner() {
        let mut g = Graph::new();
        g.upsert_node(Node::new("orphan:1", kinds::SERVICE_VERSION));
        g.upsert_node(Node::new("dev", kinds::ENVIRONMENT));
        let err = AllowListRule.validate(&g, "orphan:1", "dev", edge_types::DEPLOYED_IN).unwrap_err();
        assert!(err.to_string().contains("owning application"));
    }

    #[test]
    fn test_promotion_requires_prior_environment() {
        let mut g = base();
        let rule = PromotionOrderRule::new(vec![PromotionRule {
            environment: "prod".into(),
            requires: "dev".into(),
        }]);

        let err = rule.validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN).unwrap_err();
        assert!(err.to_string().contains("must be deployed to 'dev' before 'prod'"));

        // dev itself has no prerequisite.
        assert!(rule.validate(&g, "svc:1.0", "dev", edge_types::DEPLOYED_IN).is_ok());

        g.insert_edge("svc:1.0", Edge::new("dev", edge_types::DEPLOYED_IN));
        assert!(rule.validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_promotion_from_requires_edges() {
        let mut g = base();
        g.insert_edge("staging", Edge::new("dev", edge_types::REQUIRES));
        let rule = PromotionOrderRule::new(vec![]);

        let err = rule.validate(&g, "svc:1.0", "staging", edge_types::DEPLOYED_IN).unwrap_err();
        assert_eq!(rule_name(err), "promotion");

        g.insert_edge("svc:1.0", Edge::new("dev", edge_types::DEPLOYED_IN));
        assert!(rule.validate(&g, "svc:1.0", "staging", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_promotion_satisfied_by_succeeded_check() {
        let mut g = base();
        let rule = PromotionOrderRule::new(vec![PromotionRule {
            environment: "prod".into(),
            requires: "dev".into(),
        }]);

        g.upsert_node(
            Node::new("smoke", kinds::CHECK)
                .with_metadata(status::KEY, status::PENDING)
                .with_metadata("environment", "dev"),
        );
        g.insert_edge("smoke", Edge::new("svc:1.0", edge_types::SATISFIES));
        assert!(rule.validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN).is_err());

        g.upsert_node(
            Node::new("smoke", kinds::CHECK)
                .with_metadata(status::KEY, status::SUCCEEDED)
                .with_metadata("environment", "dev"),
        );
        assert!(rule.validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN).is_ok());
    }

    #[test]
    fn test_enforced_policy_needs_succeeded_check() {
        let mut g = base();
        g.upsert_node(Node::new("sec-scan", kinds::POLICY).with_metadata(status::KEY, status::ACTIVE));
        g.insert_edge("sec-scan", Edge::new("prod", edge_types::ENFORCES));

        let err = EnforcedPolicyRule
            .validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .unwrap_err();
        assert!(err.to_string().contains("policy 'sec-scan'"));

        // A succeeded check for a different subject does not count.
        g.upsert_node(
            Node::new("scan-other", kinds::CHECK)
                .with_metadata(status::KEY, status::SUCCEEDED)
                .with_metadata("subject", "svc:0.9"),
        );
        g.insert_edge("scan-other", Edge::new("sec-scan", edge_types::SATISFIES));
        assert!(EnforcedPolicyRule
            .validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .is_err());

        g.upsert_node(
            Node::new("scan-1", kinds::CHECK)
                .with_metadata(status::KEY, status::SUCCEEDED)
                .with_metadata("subject", "svc:1.0"),
        );
        g.insert_edge("scan-1", Edge::new("sec-scan", edge_types::SATISFIES));
        assert!(EnforcedPolicyRule
            .validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .is_ok());
    }

    #[test]
    fn test_pending_policy_not_enforced() {
        let mut g = base();
        g.upsert_node(Node::new("later", kinds::POLICY).with_metadata(status::KEY, status::PENDING));
        g.insert_edge("later", Edge::new("prod", edge_types::ENFORCES));
        assert!(EnforcedPolicyRule
            .validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .is_ok());
    }

    #[test]
    fn test_chain_first_rejection_wins() {
        let g = base();
        let chain = PolicyChain::from_config(&PolicyConfig::default());
        assert_eq!(chain.rule_names(), vec!["allow_list", "promotion", "enforced_policy"]);

        let err = chain.validate(&g, "svc:1.0", "prod", edge_types::DEPLOYED_IN).unwrap_err();
        assert_eq!(rule_name(err), "allow_list");
    }

    #[test]
    fn test_chain_respects_disabled_rules() {
        let config = PolicyConfig {
            allow_list: false,
            enforce_checks: false,
            promotion: vec![],
        };
        let chain = PolicyChain::from_config(&config);
        assert_eq!(chain.rule_names(), vec!["promotion"]);
        assert!(chain
            .validate(&base(), "svc:1.0", "prod", edge_types::DEPLOYED_IN)
            .is_ok());
    }
}
