use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;

use strata_core::error::Result;
use strata_core::traits::Agent;
use strata_core::types::{edge_types, payload_keys, AgentCapability, Event, Fields};
use strata_graph::{Catalog, EdgeOutcome};

use super::required_str;

/// Records policy-gated deployments in the graph.
///
/// Request payload: `version`, `environment`, optional `user`. Reply:
/// `created` (false when the deployment already existed) and `order`, the
/// planned processing order starting at the deployed version.
pub struct DeploymentAgent {
    catalog: Catalog,
    capabilities: Vec<AgentCapability>,
}

impl DeploymentAgent {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            capabilities: vec![AgentCapability::new(
                "deployment_execution",
                "Record a deployment of a service version into an environment",
            )
            .with_intents(&["deploy", "release", "rollout", "promote"])
            .with_routing_keys(&["deployment"])
            .with_io(&["service_version", "environment"], &["deployment_order"])],
        }
    }
}

impl Agent for DeploymentAgent {
    fn id(&self) -> &str {
        "deployment"
    }

    fn agent_type(&self) -> &str {
        "deployment"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn handle(&self, event: Event) -> BoxFuture<'_, Result<Fields>> {
        Box::pin(async move {
            let version = required_str(&event.payload, "version")?;
            let environment = required_str(&event.payload, "environment")?;
            let user = event
                .payload
                .get(payload_keys::USER)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            let outcome = self.catalog.deploy(version, environment).await?;
            let order = self
                .catalog
                .graph()
                .plan_from(
                    &[version],
                    &[edge_types::USES, edge_types::INSTANCE_OF, edge_types::DEPLOYED_IN],
                )
                .await?;
            info!(version, environment, user, ?outcome, "Deployment executed");

            let mut reply = Fields::new();
            reply.insert("created".into(), json!(outcome == EdgeOutcome::Created));
            reply.insert("version".into(), json!(version));
            reply.insert("environment".into(), json!(environment));
            reply.insert("order".into(), json!(order));
            Ok(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::error::StrataError;
    use strata_test_utils::scenario_graph;

    fn request(version: &str, environment: &str) -> Event {
        let mut payload = Fields::new();
        payload.insert("version".into(), json!(version));
        payload.insert("environment".into(), json!(environment));
        payload.insert(payload_keys::USER.into(), json!("ops@example.com"));
        Event::new("agent.request", "test", "deployment", payload)
    }

    #[tokio::test]
    async fn test_deploys_in_promotion_order() {
        let catalog = Catalog::new(scenario_graph().await);
        let agent = DeploymentAgent::new(catalog.clone());

        let err = agent.handle(request("svc:1.0", "prod")).await.unwrap_err();
        assert!(matches!(err, StrataError::PolicyViolation { .. }));

        let reply = agent.handle(request("svc:1.0", "dev")).await.unwrap();
        assert_eq!(reply["created"], json!(true));
        assert_eq!(reply["order"], json!(["svc:1.0", "dev"]));

        let reply = agent.handle(request("svc:1.0", "dev")).await.unwrap();
        assert_eq!(reply["created"], json!(false));

        let reply = agent.handle(request("svc:1.0", "prod")).await.unwrap();
        assert_eq!(reply["order"], json!(["svc:1.0", "dev", "prod"]));
    }
}
