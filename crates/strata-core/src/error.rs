use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    // Lookup errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    // Graph mutation errors
    #[error("Policy violation ({rule}): {reason}")]
    PolicyViolation { rule: String, reason: String },

    #[error("Duplicate edge: {from} -[{edge_type}]-> {to}")]
    DuplicateEdge {
        from: String,
        to: String,
        edge_type: String,
    },

    // Planner errors
    #[error("Cyclic dependency through: {}", .nodes.join(" -> "))]
    CyclicDependency { nodes: Vec<String> },

    // Routing errors
    #[error("No capability matches intent: {0}")]
    NoMatchingCapability(String),

    #[error("No agents available for capability: {0}")]
    NoAgentsAvailable(String),

    #[error("Request to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Agent {agent} failed: {message}")]
    AgentFailed { agent: String, message: String },

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Infrastructure errors
    #[error("Graph backend error: {0}")]
    Backend(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrataError {
    /// Build a policy violation attributed to the named rule.
    pub fn policy(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// True for every "referenced thing is absent" variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound(_) | Self::AgentNotFound(_) | Self::CapabilityNotFound(_)
        )
    }

    /// HTTP status an API layer should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NodeNotFound(_) | Self::AgentNotFound(_) | Self::CapabilityNotFound(_) => 404,
            Self::NoMatchingCapability(_) => 404,
            Self::PolicyViolation { .. } => 403,
            Self::DuplicateEdge { .. } | Self::CyclicDependency { .. } => 409,
            Self::Validation(_) => 400,
            Self::NoAgentsAvailable(_) => 503,
            Self::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
