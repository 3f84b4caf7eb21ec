//! Fixtures shared by the Strata test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use strata_core::config::PolicyConfig;
use strata_core::error::{Result, StrataError};
use strata_core::traits::Agent;
use strata_core::types::{edge_types, kinds, AgentCapability, Event, Fields, Node};
use strata_graph::{PlatformGraph, PolicyChain};
use strata_store::MemoryBackend;

/// Capability named `name` whose intent phrases are `intents`.
pub fn capability(name: &str, intents: &[&str]) -> AgentCapability {
    AgentCapability::new(name, format!("{} capability", name)).with_intents(intents)
}

/// Policy-gated graph with the default rules and the deployment scenario
/// loaded: `app` owns `svc`, `svc` has version `svc:1.0`, and `app` is
/// allowed in `dev` and `prod`. Nothing is deployed yet.
pub async fn scenario_graph() -> Arc<PlatformGraph> {
    let graph = PlatformGraph::with_validator(
        Arc::new(MemoryBackend::new()),
        Arc::new(PolicyChain::from_config(&PolicyConfig::default())),
    );
    for (id, kind) in [
        ("app", kinds::APPLICATION),
        ("svc", kinds::SERVICE),
        ("svc:1.0", kinds::SERVICE_VERSION),
        ("dev", kinds::ENVIRONMENT),
        ("prod", kinds::ENVIRONMENT),
    ] {
        graph.add_node(Node::new(id, kind)).await.unwrap();
    }
    for (from, to, edge_type) in [
        ("app", "svc", edge_types::OWNS),
        ("app", "dev", edge_types::ALLOWED_IN),
        ("app", "prod", edge_types::ALLOWED_IN),
        ("svc", "svc:1.0", edge_types::HAS_VERSION),
    ] {
        graph.add_edge(from, to, edge_type).await.unwrap();
    }
    Arc::new(graph)
}

/// Replies with the request payload plus `handled_by`, and counts calls.
pub struct EchoAgent {
    id: String,
    capabilities: Vec<AgentCapability>,
    handled: AtomicUsize,
}

impl EchoAgent {
    pub fn new(id: &str, capabilities: Vec<AgentCapability>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
            handled: AtomicUsize::new(0),
        }
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

impl Agent for EchoAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn handle(&self, event: Event) -> BoxFuture<'_, Result<Fields>> {
        Box::pin(async move {
            self.handled.fetch_add(1, Ordering::SeqCst);
            let mut reply = event.payload;
            reply.insert("handled_by".into(), self.id.clone().into());
            Ok(reply)
        })
    }
}

/// Never answers: `handle` does not complete.
pub struct SilentAgent {
    id: String,
    capabilities: Vec<AgentCapability>,
}

impl SilentAgent {
    pub fn new(id: &str, capabilities: Vec<AgentCapability>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
        }
    }
}

impl Agent for SilentAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        "silent"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn handle(&self, _event: Event) -> BoxFuture<'_, Result<Fields>> {
        Box::pin(futures::future::pending())
    }
}

/// Hangs on its first request and answers every later one at once with
/// its call number.
pub struct StallOnceAgent {
    id: String,
    capabilities: Vec<AgentCapability>,
    calls: AtomicUsize,
}

impl StallOnceAgent {
    pub fn new(id: &str, capabilities: Vec<AgentCapability>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Agent for StallOnceAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        "stall_once"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn handle(&self, _event: Event) -> BoxFuture<'_, Result<Fields>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if call == 0 {
                futures::future::pending::<()>().await;
            }
            let mut reply = Fields::new();
            reply.insert("call".into(), call.into());
            Ok(reply)
        })
    }
}

/// Fails every request.
pub struct FailingAgent {
    id: String,
    capabilities: Vec<AgentCapability>,
}

impl FailingAgent {
    pub fn new(id: &str, capabilities: Vec<AgentCapability>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
        }
    }
}

impl Agent for FailingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        "failing"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    fn handle(&self, _event: Event) -> BoxFuture<'_, Result<Fields>> {
        let message = format!("{} always fails", self.id);
        Box::pin(async move { Err(StrataError::Validation(message)) })
    }
}
