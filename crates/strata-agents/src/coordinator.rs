use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strata_core::config::{AgentsConfig, BusConfig};
use strata_core::error::{Result, StrataError};
use strata_core::event::{DedupHandler, EventBus};
use strata_core::traits::{handler_fn, Agent, EventHandler};
use strata_core::types::{
    event_types, payload_keys, AgentCapability, AgentState, AgentStatus, Event, Fields,
    SubscriptionId,
};

use crate::intent;
use crate::pending::PendingResponses;
use crate::registry::{ActivityTracker, AgentRegistry};

/// Routing key every hosted agent listens on for directed requests.
pub fn direct_key(agent_id: &str) -> String {
    format!("agent.{}", agent_id)
}

/// Outcome of intent resolution: the winning capability and its agents.
#[derive(Debug, Clone, Serialize)]
pub struct IntentResolution {
    pub capability: AgentCapability,
    pub agents: Vec<AgentStatus>,
}

/// One agent's answer to a request.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub agent_id: String,
    pub payload: Fields,
}

/// Event handler that runs an agent for every request addressed to it and
/// publishes the correlated reply.
///
/// Every call runs under a deadline: the request's `deadline_ms` when present,
/// otherwise `handle_timeout`. Past a requester's own deadline nobody is
/// waiting, so the call is abandoned without a reply.
struct HostedAgent {
    agent: Arc<dyn Agent>,
    tracker: Arc<ActivityTracker>,
    bus: Arc<EventBus>,
    handle_timeout: Duration,
}

impl HostedAgent {
    fn requested_deadline(event: &Event) -> Option<Duration> {
        event
            .payload
            .get(payload_keys::DEADLINE_MS)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
    }
}

impl EventHandler for HostedAgent {
    fn handle(&self, event: Event) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let agent_id = self.agent.id();
            if event.event_type == event_types::AGENT_RESPONSE || !event.is_addressed_to(agent_id) {
                return Ok(());
            }

            let requested = Self::requested_deadline(&event);
            let deadline = requested.unwrap_or(self.handle_timeout);
            let outcome = {
                let _busy = self.tracker.begin();
                tokio::time::timeout(deadline, self.agent.handle(event.clone())).await
            };
            let payload = match outcome {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    warn!(agent = agent_id, event_id = %event.id, error = %e, "Agent failed to handle event");
                    error_payload(&e)
                }
                Err(_) => {
                    let timeout_ms = deadline.as_millis() as u64;
                    warn!(agent = agent_id, event_id = %event.id, timeout_ms, "Agent call abandoned at deadline");
                    if requested.is_some() {
                        return Ok(());
                    }
                    error_payload(&StrataError::Timeout {
                        target: agent_id.to_string(),
                        timeout_ms,
                    })
                }
            };

            if event.correlation_id().is_some() {
                self.bus.emit_event(event.reply(agent_id, payload)).await?;
            }
            Ok(())
        })
    }
}

fn error_payload(error: &StrataError) -> Fields {
    let mut payload = Fields::new();
    payload.insert(payload_keys::ERROR.to_string(), error.to_string().into());
    payload
}

/// Routes work to agents over the event bus.
///
/// Hosts agents (registry entry plus bus subscriptions), resolves free-text
/// intents to capabilities, and performs directed, request/response, and
/// broadcast dispatch. Responses are matched to requests by correlation ID.
pub struct AgentCoordinator {
    id: String,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    pending: PendingResponses,
    hosted: Mutex<HashMap<String, Vec<SubscriptionId>>>,
    response_subscription: SubscriptionId,
    default_timeout: Duration,
    dedup_window: usize,
}

impl AgentCoordinator {
    /// Create a coordinator and start listening for agent responses.
    pub async fn new(registry: Arc<AgentRegistry>, bus: Arc<EventBus>) -> Result<Self> {
        let pending = PendingResponses::new();
        let sink = pending.clone();
        let response_subscription = bus
            .subscribe(
                event_types::AGENT_RESPONSE,
                handler_fn(move |event: Event| {
                    let sink = sink.clone();
                    async move {
                        sink.complete(event);
                        Ok(())
                    }
                }),
            )
            .await?;

        let defaults = AgentsConfig::default();
        Ok(Self {
            id: "coordinator".to_string(),
            registry,
            bus,
            pending,
            hosted: Mutex::new(HashMap::new()),
            response_subscription,
            default_timeout: Duration::from_millis(defaults.request_timeout_ms),
            dedup_window: BusConfig::default().dedup_window,
        })
    }

    /// Apply `[agents]` settings.
    pub fn with_config(mut self, config: &AgentsConfig) -> Self {
        self.default_timeout = Duration::from_millis(config.request_timeout_ms);
        self
    }

    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Register an agent and subscribe it to its routing keys and direct key.
    /// Starting an already hosted ID replaces the previous agent.
    pub async fn start_agent(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let agent_id = agent.id().to_string();
        let mut hosted = self.hosted.lock().await;
        if let Some(previous) = hosted.remove(&agent_id) {
            self.unsubscribe_all(&agent_id, previous).await;
        }

        let tracker = self.registry.register_agent(agent.clone()).await?;
        let handler: Arc<dyn EventHandler> = Arc::new(DedupHandler::new(
            Arc::new(HostedAgent {
                agent: agent.clone(),
                tracker: tracker.clone(),
                bus: self.bus.clone(),
                handle_timeout: self.default_timeout,
            }),
            self.dedup_window,
        ));

        let mut keys: Vec<String> = Vec::new();
        for key in agent
            .capabilities()
            .iter()
            .flat_map(|c| c.routing_keys.iter())
            .cloned()
            .chain(std::iter::once(direct_key(&agent_id)))
        {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let mut subscriptions = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.bus.subscribe_to_routing_key(key, handler.clone()).await {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    self.unsubscribe_all(&agent_id, subscriptions).await;
                    let _ = self.registry.unregister_agent(&agent_id).await;
                    return Err(e);
                }
            }
        }
        hosted.insert(agent_id.clone(), subscriptions);
        drop(hosted);
        tracker.set_running(true);

        info!(agent = %agent_id, routing_keys = ?keys, "Agent started");
        let mut payload = Fields::new();
        payload.insert("agent_id".into(), agent_id.clone().into());
        payload.insert("routing_keys".into(), keys.into());
        self.bus
            .emit(event_types::AGENT_STARTED, &agent_id, "", payload)
            .await?;
        Ok(())
    }

    /// Unsubscribe and unregister a hosted agent.
    pub async fn stop_agent(&self, agent_id: &str) -> Result<()> {
        let subscriptions = self.hosted.lock().await.remove(agent_id);
        let Some(subscriptions) = subscriptions else {
            return Err(StrataError::AgentNotFound(agent_id.to_string()));
        };
        self.unsubscribe_all(agent_id, subscriptions).await;

        if let Ok(tracker) = self.registry.tracker(agent_id).await {
            tracker.set_running(false);
        }
        self.registry.unregister_agent(agent_id).await?;

        info!(agent = agent_id, "Agent stopped");
        let mut payload = Fields::new();
        payload.insert("agent_id".into(), agent_id.into());
        self.bus
            .emit(event_types::AGENT_STOPPED, agent_id, "", payload)
            .await?;
        Ok(())
    }

    /// Stop every hosted agent and stop listening for responses.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.hosted.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop_agent(&id).await {
                warn!(agent = %id, error = %e, "Failed to stop agent");
            }
        }
        self.bus.unsubscribe(self.response_subscription).await
    }

    async fn unsubscribe_all(&self, agent_id: &str, subscriptions: Vec<SubscriptionId>) {
        for id in subscriptions {
            if let Err(e) = self.bus.unsubscribe(id).await {
                warn!(agent = agent_id, subscription = %id, error = %e, "Unsubscribe failed");
            }
        }
    }

    /// Match a free-text intent to a capability and the agents exposing it.
    pub async fn resolve_intent(&self, intent: &str) -> Result<IntentResolution> {
        let capabilities = self.registry.get_available_capabilities().await;
        let capability = intent::resolve(intent, &capabilities)?.clone();
        let agents = self.registry.find_agents_by_capability(&capability.name).await;
        if agents.is_empty() {
            return Err(StrataError::NoAgentsAvailable(capability.name));
        }
        debug!(intent, capability = %capability.name, agents = agents.len(), "Intent resolved");
        Ok(IntentResolution { capability, agents })
    }

    fn request_event(&self, agent_id: &str, mut payload: Fields) -> Event {
        payload.insert(payload_keys::TARGET_AGENT.to_string(), agent_id.into());
        Event::new(
            event_types::AGENT_REQUEST,
            self.id.as_str(),
            direct_key(agent_id),
            payload,
        )
    }

    /// Fire-and-forget delivery to one agent.
    pub async fn send_to_agent(&self, agent_id: &str, payload: Fields) -> Result<Event> {
        self.registry.find_agent_by_id(agent_id).await?;
        let event = self.request_event(agent_id, payload);
        self.bus.emit_event(event.clone()).await?;
        debug!(agent = agent_id, event_id = %event.id, "Event sent to agent");
        Ok(event)
    }

    /// Send a request to one agent and wait up to `timeout` for its reply.
    pub async fn request_from_agent(
        &self,
        agent_id: &str,
        payload: Fields,
        timeout: Duration,
    ) -> Result<Fields> {
        self.request(agent_id, payload, timeout, None).await
    }

    /// Like `request_from_agent`, but gives up as soon as `cancel` fires.
    pub async fn request_with_cancel(
        &self,
        agent_id: &str,
        payload: Fields,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Fields> {
        self.request(agent_id, payload, timeout, Some(cancel)).await
    }

    async fn request(
        &self,
        agent_id: &str,
        mut payload: Fields,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Fields> {
        self.registry.find_agent_by_id(agent_id).await?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        payload.insert(
            payload_keys::CORRELATION_ID.to_string(),
            correlation_id.clone().into(),
        );
        let timeout_ms = timeout.as_millis() as u64;
        payload.insert(payload_keys::DEADLINE_MS.to_string(), timeout_ms.into());
        // Registered before publishing: a synchronous transport replies inside emit.
        let mut waiter = self.pending.register(correlation_id.as_str())?;
        let request = self.request_event(agent_id, payload);
        // The deadline covers the publish too, since in-process delivery runs the agent inline.
        let exchange = async {
            self.bus.emit_event(request).await?;
            waiter.response().await
        };

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(agent = agent_id, correlation_id = %correlation_id, "Request cancelled");
                return Err(StrataError::Cancelled);
            }
            result = tokio::time::timeout(timeout, exchange) => match result {
                Ok(response) => response?,
                Err(_) => {
                    warn!(agent = agent_id, correlation_id = %correlation_id, timeout_ms, "Request timed out");
                    return Err(StrataError::Timeout {
                        target: agent_id.to_string(),
                        timeout_ms,
                    });
                }
            },
        };

        if let Some(message) = response.error() {
            return Err(StrataError::AgentFailed {
                agent: agent_id.to_string(),
                message: message.to_string(),
            });
        }
        let mut result = response.payload;
        result.remove(payload_keys::CORRELATION_ID);
        result.remove(payload_keys::DEADLINE_MS);
        Ok(result)
    }

    /// Request from every agent with `capability` and collect the replies.
    /// Agents that fail or time out are skipped.
    pub async fn broadcast_to_capability(
        &self,
        capability: &str,
        payload: Fields,
        timeout: Duration,
    ) -> Result<Vec<AgentReply>> {
        let agents = self.registry.find_agents_by_capability(capability).await;
        if agents.is_empty() {
            return Err(StrataError::NoAgentsAvailable(capability.to_string()));
        }

        let futs: Vec<_> = agents
            .iter()
            .map(|status| {
                let payload = payload.clone();
                async move {
                    let reply = self.request_from_agent(&status.id, payload, timeout).await;
                    (status.id.clone(), reply)
                }
            })
            .collect();
        let results = futures::future::join_all(futs).await;

        let mut replies = Vec::new();
        for (agent_id, result) in results {
            match result {
                Ok(payload) => replies.push(AgentReply { agent_id, payload }),
                Err(e) => warn!(agent = %agent_id, capability, error = %e, "Broadcast reply skipped"),
            }
        }
        info!(capability, asked = agents.len(), answered = replies.len(), "Broadcast complete");
        Ok(replies)
    }

    /// Resolve `intent` and request from the first running agent for it.
    pub async fn dispatch_intent(
        &self,
        intent: &str,
        mut payload: Fields,
        timeout: Duration,
    ) -> Result<AgentReply> {
        let resolution = self.resolve_intent(intent).await?;
        let agent = resolution
            .agents
            .iter()
            .find(|a| a.status != AgentState::Stopped)
            .ok_or_else(|| StrataError::NoAgentsAvailable(resolution.capability.name.clone()))?;

        payload.insert(payload_keys::INTENT.to_string(), intent.into());
        payload.insert(
            payload_keys::CAPABILITY.to_string(),
            resolution.capability.name.clone().into(),
        );
        info!(intent, capability = %resolution.capability.name, agent = %agent.id, "Dispatching intent");
        let reply = self.request_from_agent(&agent.id, payload, timeout).await?;
        Ok(AgentReply {
            agent_id: agent.id.clone(),
            payload: reply,
        })
    }
}
