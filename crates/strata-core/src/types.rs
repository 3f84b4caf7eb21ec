use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form key/value map used for node metadata, node spec, and event payloads.
pub type Fields = HashMap<String, serde_json::Value>;

/// Well-known node kinds. The graph itself never matches on these; only
/// policy rules and catalog helpers do.
pub mod kinds {
    pub const APPLICATION: &str = "application";
    pub const SERVICE: &str = "service";
    pub const SERVICE_VERSION: &str = "service_version";
    pub const ENVIRONMENT: &str = "environment";
    pub const RESOURCE: &str = "resource";
    pub const RESOURCE_TYPE: &str = "resource_type";
    pub const POLICY: &str = "policy";
    pub const CHECK: &str = "check";
}

/// Well-known edge types.
pub mod edge_types {
    pub const OWNS: &str = "owns";
    pub const DEPLOYED_IN: &str = "deployed_in";
    pub const ALLOWED_IN: &str = "allowed_in";
    pub const USES: &str = "uses";
    pub const HAS_VERSION: &str = "has_version";
    pub const INSTANCE_OF: &str = "instance_of";
    pub const SATISFIES: &str = "satisfies";
    pub const ENFORCES: &str = "enforces";
    pub const REQUIRES: &str = "requires";
}

/// Status values carried in policy/check node metadata.
pub mod status {
    pub const KEY: &str = "status";
    pub const ACTIVE: &str = "active";
    pub const PENDING: &str = "pending";
    pub const SUCCEEDED: &str = "succeeded";
}

/// A platform entity in the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: Fields,
    #[serde(default)]
    pub spec: Fields,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            metadata: Fields::new(),
            spec: Fields::new(),
        }
    }

    /// Set a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set a spec entry.
    pub fn with_spec(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.spec.insert(key.into(), value.into());
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Read a string-valued metadata entry.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// The `status` metadata entry, if any.
    pub fn status(&self) -> Option<&str> {
        self.meta_str(status::KEY)
    }
}

/// A typed relationship, stored in the adjacency list of its source node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
}

impl Edge {
    pub fn new(to: impl Into<String>, edge_type: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            edge_type: edge_type.into(),
        }
    }
}

/// Full node + edge state, as exchanged with a `GraphBackend`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: HashMap<String, Node>,
    #[serde(default)]
    pub edges: HashMap<String, Vec<Edge>>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.values().all(|e| e.is_empty())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

/// Conventional payload keys.
pub mod payload_keys {
    pub const INTENT: &str = "intent";
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Milliseconds the requester waits; hosted agents give up after it.
    pub const DEADLINE_MS: &str = "deadline_ms";
    pub const REQUEST_ID: &str = "request_id";
    pub const TARGET_AGENT: &str = "target_agent";
    pub const CAPABILITY: &str = "capability";
    pub const ERROR: &str = "error";
    pub const USER: &str = "user";
}

/// Event types emitted by the agent framework itself.
pub mod event_types {
    pub const AGENT_REQUEST: &str = "agent.request";
    pub const AGENT_RESPONSE: &str = "agent.response";
    pub const AGENT_STARTED: &str = "agent.started";
    pub const AGENT_STOPPED: &str = "agent.stopped";
}

/// Target value meaning "every agent listening on this key".
pub const BROADCAST_TARGET: &str = "*";

/// An immutable message on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    /// Routing key the event is published under (may be empty).
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub payload: Fields,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: impl Into<String>,
        payload: Fields,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            subject: subject.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    pub fn intent(&self) -> Option<&str> {
        self.payload_str(payload_keys::INTENT)
    }

    /// Correlation token, accepting `request_id` as an alias.
    pub fn correlation_id(&self) -> Option<&str> {
        self.payload_str(payload_keys::CORRELATION_ID)
            .or_else(|| self.payload_str(payload_keys::REQUEST_ID))
    }

    pub fn target_agent(&self) -> Option<&str> {
        self.payload_str(payload_keys::TARGET_AGENT)
    }

    /// Whether an agent with `agent_id` should act on this event.
    /// Events without a target, or with the broadcast target, address everyone.
    pub fn is_addressed_to(&self, agent_id: &str) -> bool {
        match self.target_agent() {
            None => true,
            Some(BROADCAST_TARGET) => true,
            Some(target) => target == agent_id,
        }
    }

    /// Build the response event for this request, carrying the same correlation id.
    pub fn reply(&self, source: impl Into<String>, mut payload: Fields) -> Self {
        if let Some(cid) = self.correlation_id() {
            payload.insert(
                payload_keys::CORRELATION_ID.to_string(),
                serde_json::Value::String(cid.to_string()),
            );
        }
        Self::new(
            event_types::AGENT_RESPONSE,
            source,
            self.source.clone(),
            payload,
        )
    }

    /// Error text carried by a response event, if the responder failed.
    pub fn error(&self) -> Option<&str> {
        self.payload_str(payload_keys::ERROR)
    }
}

/// A named, intent-tagged unit of functionality an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub input_types: Vec<String>,
    #[serde(default)]
    pub output_types: Vec<String>,
    #[serde(default)]
    pub routing_keys: Vec<String>,
    #[serde(default = "default_capability_version")]
    pub version: String,
}

fn default_capability_version() -> String {
    "1.0.0".to_string()
}

impl AgentCapability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            intents: vec![],
            input_types: vec![],
            output_types: vec![],
            routing_keys: vec![],
            version: default_capability_version(),
        }
    }

    pub fn with_intents(mut self, intents: &[&str]) -> Self {
        self.intents = intents.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_routing_keys(mut self, keys: &[&str]) -> Self {
        self.routing_keys = keys.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_io(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.input_types = inputs.iter().map(|s| s.to_string()).collect();
        self.output_types = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Coarse lifecycle state of a hosted agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Busy,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of a registered agent. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: AgentState,
    pub last_activity: DateTime<Utc>,
    pub load_factor: f64,
    pub version: String,
}

/// Handle returned by transport subscriptions, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edge_serializes_type_field() {
        let edge = Edge::new("prod", edge_types::DEPLOYED_IN);
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value, json!({"to": "prod", "type": "deployed_in"}));
    }

    #[test]
    fn test_event_addressing() {
        let mut payload = Fields::new();
        payload.insert(payload_keys::TARGET_AGENT.into(), json!("deployer"));
        let event = Event::new("x", "test", "", payload);
        assert!(event.is_addressed_to("deployer"));
        assert!(!event.is_addressed_to("policy"));

        let mut payload = Fields::new();
        payload.insert(payload_keys::TARGET_AGENT.into(), json!("*"));
        let event = Event::new("x", "test", "", payload);
        assert!(event.is_addressed_to("anyone"));

        let untargeted = Event::new("x", "test", "", Fields::new());
        assert!(untargeted.is_addressed_to("anyone"));
    }

    #[test]
    fn test_reply_keeps_correlation_id() {
        let mut payload = Fields::new();
        payload.insert(payload_keys::REQUEST_ID.into(), json!("req-7"));
        let request = Event::new(event_types::AGENT_REQUEST, "coordinator", "agent.a", payload);

        let reply = request.reply("a", Fields::new());
        assert_eq!(reply.event_type, event_types::AGENT_RESPONSE);
        assert_eq!(reply.correlation_id(), Some("req-7"));
        assert_eq!(reply.subject, "coordinator");
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn test_node_status_helpers() {
        let node = Node::new("lint", kinds::CHECK).with_metadata(status::KEY, status::SUCCEEDED);
        assert_eq!(node.status(), Some("succeeded"));
        assert!(node.is_kind("check"));
    }
}
