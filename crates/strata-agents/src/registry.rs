use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use strata_core::error::{Result, StrataError};
use strata_core::traits::Agent;
use strata_core::types::{AgentCapability, AgentState, AgentStatus};

/// Live counters for one registered agent.
///
/// Shared between the registry (which derives `AgentStatus` from it) and the
/// coordinator (which bumps it around every handled request).
pub struct ActivityTracker {
    in_flight: AtomicUsize,
    running: AtomicBool,
    last_activity: Mutex<DateTime<Utc>>,
}

impl ActivityTracker {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            last_activity: Mutex::new(Utc::now()),
        }
    }

    /// Mark one request in flight until the returned guard is dropped.
    pub fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActivityGuard(self.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        self.touch();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.last_activity.lock() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn touch(&self) {
        if let Ok(mut t) = self.last_activity.lock() {
            *t = Utc::now();
        }
    }
}

/// Releases one in-flight slot on drop.
pub struct ActivityGuard(Arc<ActivityTracker>);

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

struct Entry {
    agent: Arc<dyn Agent>,
    tracker: Arc<ActivityTracker>,
}

impl Entry {
    fn status(&self) -> AgentStatus {
        let in_flight = self.tracker.in_flight();
        let state = if !self.tracker.is_running() {
            AgentState::Stopped
        } else if in_flight > 0 {
            AgentState::Busy
        } else {
            AgentState::Idle
        };
        AgentStatus {
            id: self.agent.id().to_string(),
            agent_type: self.agent.agent_type().to_string(),
            status: state,
            last_activity: self.tracker.last_activity(),
            load_factor: in_flight as f64 / self.agent.max_concurrency().max(1) as f64,
            version: self.agent.version().to_string(),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Registration order.
    agents: Vec<Entry>,
    /// Capability name -> agent IDs, in registration order.
    by_capability: HashMap<String, Vec<String>>,
}

impl Inner {
    fn position(&self, id: &str) -> Option<usize> {
        self.agents.iter().position(|e| e.agent.id() == id)
    }

    fn reindex(&mut self) {
        self.by_capability.clear();
        for entry in &self.agents {
            for cap in entry.agent.capabilities() {
                let ids = self.by_capability.entry(cap.name.clone()).or_default();
                let id = entry.agent.id();
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                }
            }
        }
    }
}

/// Tracks live agents and the capabilities they expose.
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any agent with the same ID in place.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<Arc<ActivityTracker>> {
        if agent.id().trim().is_empty() {
            return Err(StrataError::Validation("agent id must not be empty".into()));
        }
        let tracker = Arc::new(ActivityTracker::new());
        let entry = Entry {
            agent: agent.clone(),
            tracker: tracker.clone(),
        };

        let mut inner = self.inner.write().await;
        let replaced = match inner.position(agent.id()) {
            Some(i) => {
                inner.agents[i] = entry;
                true
            }
            None => {
                inner.agents.push(entry);
                false
            }
        };
        inner.reindex();

        info!(
            agent = agent.id(),
            agent_type = agent.agent_type(),
            capabilities = agent.capabilities().len(),
            replaced,
            "Agent registered"
        );
        Ok(tracker)
    }

    /// Remove an agent and its capability index entries.
    pub async fn unregister_agent(&self, id: &str) -> Result<Arc<dyn Agent>> {
        let mut inner = self.inner.write().await;
        let index = inner
            .position(id)
            .ok_or_else(|| StrataError::AgentNotFound(id.to_string()))?;
        let entry = inner.agents.remove(index);
        inner.reindex();
        info!(agent = id, "Agent unregistered");
        Ok(entry.agent)
    }

    /// Status of every agent exposing `capability`, in registration order.
    pub async fn find_agents_by_capability(&self, capability: &str) -> Vec<AgentStatus> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_capability.get(capability) else {
            debug!(capability, "No agents for capability");
            return vec![];
        };
        ids.iter()
            .filter_map(|id| inner.position(id))
            .map(|i| inner.agents[i].status())
            .collect()
    }

    pub async fn find_agent_by_id(&self, id: &str) -> Result<AgentStatus> {
        let inner = self.inner.read().await;
        inner
            .position(id)
            .map(|i| inner.agents[i].status())
            .ok_or_else(|| StrataError::AgentNotFound(id.to_string()))
    }

    pub async fn tracker(&self, id: &str) -> Result<Arc<ActivityTracker>> {
        let inner = self.inner.read().await;
        inner
            .position(id)
            .map(|i| inner.agents[i].tracker.clone())
            .ok_or_else(|| StrataError::AgentNotFound(id.to_string()))
    }

    /// Union of all registered capabilities, deduplicated by name.
    /// On a name clash the earliest registrant's declaration wins.
    pub async fn get_available_capabilities(&self) -> Vec<AgentCapability> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut caps = Vec::new();
        for entry in &inner.agents {
            for cap in entry.agent.capabilities() {
                if seen.insert(cap.name.clone()) {
                    caps.push(cap.clone());
                }
            }
        }
        caps
    }

    pub async fn capability(&self, name: &str) -> Result<AgentCapability> {
        self.get_available_capabilities()
            .await
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StrataError::CapabilityNotFound(name.to_string()))
    }

    /// Status of every registered agent, in registration order.
    pub async fn health(&self) -> Vec<AgentStatus> {
        let inner = self.inner.read().await;
        inner.agents.iter().map(Entry::status).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
