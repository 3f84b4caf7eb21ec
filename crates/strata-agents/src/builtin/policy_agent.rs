use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use strata_core::error::{Result, StrataError};
use strata_core::traits::Agent;
use strata_core::types::{edge_types, AgentCapability, Event, Fields};
use strata_graph::PlatformGraph;

use super::required_str;

/// Answers "would this edge be allowed?" without changing the graph.
///
/// Request payload: `from`, `to`, and optional `edge_type` (defaults to
/// `deployed_in`). Reply: `allowed`, plus `rule` and `reason` on rejection.
pub struct PolicyAgent {
    graph: Arc<PlatformGraph>,
    capabilities: Vec<AgentCapability>,
}

impl PolicyAgent {
    pub fn new(graph: Arc<PlatformGraph>) -> Self {
        Self {
            graph,
            capabilities: vec![AgentCapability::new(
                "policy_evaluation",
                "Evaluate platform policies against a proposed change",
            )
            .with_intents(&["check policy", "compliance", "allowed", "validate"])
            .with_routing_keys(&["policy"])
            .with_io(&["edge"], &["verdict"])],
        }
    }
}

impl Agent for PolicyAgent {
    fn id(&self) -> &str {
        "policy"
    }

    fn agent_type(&self) -> &str {
        "policy"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn max_concurrency(&self) -> usize {
        4
    }

    fn handle(&self, event: Event) -> BoxFuture<'_, Result<Fields>> {
        Box::pin(async move {
            let from = required_str(&event.payload, "from")?;
            let to = required_str(&event.payload, "to")?;
            let edge_type = event
                .payload
                .get("edge_type")
                .and_then(|v| v.as_str())
                .unwrap_or(edge_types::DEPLOYED_IN);

            let mut reply = Fields::new();
            match self.graph.check_edge(from, to, edge_type).await {
                Ok(()) => {
                    reply.insert("allowed".into(), json!(true));
                }
                Err(StrataError::PolicyViolation { rule, reason }) => {
                    reply.insert("allowed".into(), json!(false));
                    reply.insert("rule".into(), json!(rule));
                    reply.insert("reason".into(), json!(reason));
                }
                Err(e) => return Err(e),
            }
            Ok(reply)
        })
    }
}
