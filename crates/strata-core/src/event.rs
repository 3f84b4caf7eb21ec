use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::debug;

use crate::config::{BusConfig, TransportKind};
use crate::error::Result;
use crate::traits::{EventHandler, Transport};
use crate::transport::{BroadcastTransport, InProcessTransport};
use crate::types::{Event, Fields, SubscriptionId};

/// Event bus over a pluggable transport.
///
/// Every event is published under `events.<type>`; events with a non-empty
/// subject are also published under `routes.<subject>`, which is what
/// routing-key subscribers listen on.
pub struct EventBus {
    transport: Arc<dyn Transport>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Bus over the synchronous in-process transport.
    pub fn in_process() -> Self {
        Self::new(Arc::new(InProcessTransport::new()))
    }

    /// Build the bus selected by configuration.
    pub fn from_config(config: &BusConfig) -> Self {
        match config.transport {
            TransportKind::InProcess => Self::in_process(),
            TransportKind::Broadcast => Self::new(Arc::new(BroadcastTransport::new(config.capacity))),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// True when emit returns only after every subscriber ran.
    pub fn is_synchronous(&self) -> bool {
        self.transport.is_synchronous()
    }

    pub fn type_subject(event_type: &str) -> String {
        format!("events.{}", event_type)
    }

    pub fn key_subject(routing_key: &str) -> String {
        format!("routes.{}", routing_key)
    }

    /// Construct and publish an event, returning it.
    pub async fn emit(
        &self,
        event_type: &str,
        source: &str,
        subject: &str,
        payload: Fields,
    ) -> Result<Event> {
        let event = Event::new(event_type, source, subject, payload);
        self.emit_event(event.clone()).await?;
        Ok(event)
    }

    /// Publish a pre-built event.
    pub async fn emit_event(&self, event: Event) -> Result<()> {
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            subject = %event.subject,
            transport = self.transport.name(),
            "Emitting event"
        );
        let by_key = (!event.subject.is_empty()).then(|| Self::key_subject(&event.subject));
        match by_key {
            Some(key_subject) => {
                self.transport
                    .publish(&Self::type_subject(&event.event_type), event.clone())
                    .await?;
                self.transport.publish(&key_subject, event).await
            }
            None => {
                self.transport
                    .publish(&Self::type_subject(&event.event_type), event)
                    .await
            }
        }
    }

    /// Receive every event of one type.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        self.transport
            .subscribe(&Self::type_subject(event_type), handler)
            .await
    }

    /// Receive every event, whatever its type.
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId> {
        self.transport.subscribe("events.*", handler).await
    }

    /// Receive only events published under a routing key.
    pub async fn subscribe_to_routing_key(
        &self,
        routing_key: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        self.transport
            .subscribe(&Self::key_subject(routing_key), handler)
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.transport.unsubscribe(id).await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::in_process()
    }
}

/// Handler wrapper that drops redelivered events.
///
/// Remembers the last `window` event IDs; an ID seen within that window is
/// acknowledged without reaching the inner handler.
pub struct DedupHandler {
    inner: Arc<dyn EventHandler>,
    window: usize,
    seen: Mutex<(HashSet<String>, VecDeque<String>)>,
}

impl DedupHandler {
    pub fn new(inner: Arc<dyn EventHandler>, window: usize) -> Self {
        Self {
            inner,
            window: window.max(1),
            seen: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Record `id`; returns false if it was already present.
    fn first_sighting(&self, id: &str) -> bool {
        let Ok(mut guard) = self.seen.lock() else {
            return true;
        };
        let (set, order) = &mut *guard;
        if set.contains(id) {
            return false;
        }
        set.insert(id.to_string());
        order.push_back(id.to_string());
        while order.len() > self.window {
            if let Some(old) = order.pop_front() {
                set.remove(&old);
            }
        }
        true
    }
}

impl EventHandler for DedupHandler {
    fn handle(&self, event: Event) -> BoxFuture<'_, Result<()>> {
        if !self.first_sighting(&event.id) {
            debug!(event_id = %event.id, "Dropping redelivered event");
            return Box::pin(async { Ok(()) });
        }
        self.inner.handle(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn EventHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler = handler_fn(move |_event: Event| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (count, handler)
    }

    #[tokio::test]
    async fn test_subscribe_by_type() {
        let bus = EventBus::in_process();
        let (count, handler) = counter();
        bus.subscribe("deployment.requested", handler).await.unwrap();

        bus.emit("deployment.requested", "test", "", Fields::new()).await.unwrap();
        bus.emit("deployment.finished", "test", "", Fields::new()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_by_routing_key() {
        let bus = EventBus::in_process();
        let (policy_count, policy_handler) = counter();
        let (deploy_count, deploy_handler) = counter();
        bus.subscribe_to_routing_key("policy", policy_handler).await.unwrap();
        bus.subscribe_to_routing_key("deployment", deploy_handler).await.unwrap();

        bus.emit("evaluate", "test", "policy", Fields::new()).await.unwrap();
        bus.emit("evaluate", "test", "policy", Fields::new()).await.unwrap();
        bus.emit("status", "test", "", Fields::new()).await.unwrap();

        assert_eq!(policy_count.load(Ordering::SeqCst), 2);
        assert_eq!(deploy_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_each_event_once() {
        let bus = EventBus::in_process();
        let (count, handler) = counter();
        bus.subscribe_all(handler).await.unwrap();

        bus.emit("a", "test", "policy", Fields::new()).await.unwrap();
        bus.emit("b", "test", "", Fields::new()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dedup_handler_drops_redelivery() {
        let (count, inner) = counter();
        let dedup = DedupHandler::new(inner, 2);

        let first = Event::new("x", "test", "", Fields::new());
        let second = Event::new("x", "test", "", Fields::new());
        let third = Event::new("x", "test", "", Fields::new());

        dedup.handle(first.clone()).await.unwrap();
        dedup.handle(first.clone()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Window of two: after two newer IDs, the first is forgotten.
        dedup.handle(second).await.unwrap();
        dedup.handle(third).await.unwrap();
        dedup.handle(first).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_from_config_selects_transport() {
        let config = BusConfig {
            transport: TransportKind::Broadcast,
            ..BusConfig::default()
        };
        let bus = EventBus::from_config(&config);
        assert_eq!(bus.transport_name(), "broadcast");
        assert!(!bus.is_synchronous());
        assert!(EventBus::default().is_synchronous());
    }
}
