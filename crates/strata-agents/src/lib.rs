//! Event-driven agent framework: registry, intent routing, and coordination.

pub mod builtin;
pub mod coordinator;
pub mod intent;
pub mod pending;
pub mod registry;

pub use builtin::{builtin_agents, DeploymentAgent, PolicyAgent};
pub use coordinator::{direct_key, AgentCoordinator, AgentReply, IntentResolution};
pub use pending::{PendingRequest, PendingResponses};
pub use registry::{ActivityGuard, ActivityTracker, AgentRegistry};
