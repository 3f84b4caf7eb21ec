use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Snapshot persistence for the platform graph.
pub trait GraphBackend: Send + Sync + 'static {
    /// Backend name for logs (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Load the full snapshot. An empty store yields an empty snapshot, not an error.
    fn load(&self) -> BoxFuture<'_, Result<GraphSnapshot>>;

    /// Replace the stored snapshot with `snapshot`.
    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>>;
}

/// Receives events delivered by a transport.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event) -> BoxFuture<'_, Result<()>>;
}

/// Adapter turning an async closure into an `EventHandler`.
pub struct FnHandler<F>(F);

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, event: Event) -> BoxFuture<'_, Result<()>> {
        Box::pin((self.0)(event))
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Moves events between publishers and subscribers.
///
/// Subjects are dot-separated strings; a subscription subject ending in `*`
/// matches every subject sharing its prefix.
pub trait Transport: Send + Sync + 'static {
    /// Transport name for logs (e.g., "in_process", "broadcast").
    fn name(&self) -> &str;

    /// True when `publish` runs every matching handler before returning.
    fn is_synchronous(&self) -> bool;

    fn publish(&self, subject: &str, event: Event) -> BoxFuture<'_, Result<()>>;

    fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> BoxFuture<'_, Result<SubscriptionId>>;

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, Result<()>>;
}

/// An autonomous domain worker reachable through the event bus.
pub trait Agent: Send + Sync + 'static {
    /// Stable agent identifier.
    fn id(&self) -> &str;

    /// Agent type (e.g., "policy", "deployment").
    fn agent_type(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Capabilities declared at construction.
    fn capabilities(&self) -> &[AgentCapability];

    /// How many requests this agent serves at once; drives the load factor.
    fn max_concurrency(&self) -> usize {
        1
    }

    /// Handle a request event and return the response payload.
    fn handle(&self, event: Event) -> BoxFuture<'_, Result<Fields>>;
}

/// Subject-matching rule shared by every transport.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => subject.starts_with(prefix),
        None => pattern == subject,
    }
}
