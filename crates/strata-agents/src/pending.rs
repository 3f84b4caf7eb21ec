use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use strata_core::error::{Result, StrataError};
use strata_core::types::Event;

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<Event>>>>;

/// Outstanding request/response exchanges, keyed by correlation ID.
#[derive(Clone, Default)]
pub struct PendingResponses {
    waiters: Waiters,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for the response carrying `correlation_id`.
    ///
    /// The entry lives exactly as long as the returned `PendingRequest`.
    pub fn register(&self, correlation_id: impl Into<String>) -> Result<PendingRequest> {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();
        let mut waiters = self
            .waiters
            .lock()
            .map_err(|e| StrataError::Transport(e.to_string()))?;
        if waiters.contains_key(&correlation_id) {
            return Err(StrataError::Validation(format!(
                "correlation id '{}' is already pending",
                correlation_id
            )));
        }
        waiters.insert(correlation_id.clone(), tx);
        Ok(PendingRequest {
            correlation_id,
            rx,
            waiters: self.waiters.clone(),
        })
    }

    /// Deliver a response to its waiter. Returns false for unknown or
    /// already-answered correlation IDs.
    pub fn complete(&self, response: Event) -> bool {
        let Some(cid) = response.correlation_id().map(str::to_string) else {
            return false;
        };
        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&cid),
            Err(_) => None,
        };
        match waiter {
            // Ignore send error (receiver may have been dropped due to timeout)
            Some(tx) => tx.send(response).is_ok(),
            None => {
                debug!(correlation_id = %cid, "No waiter for response");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One registered waiter. Dropping it withdraws the registration.
pub struct PendingRequest {
    correlation_id: String,
    rx: oneshot::Receiver<Event>,
    waiters: Waiters,
}

impl PendingRequest {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the matching response.
    pub async fn response(&mut self) -> Result<Event> {
        (&mut self.rx)
            .await
            .map_err(|_| StrataError::Transport("response channel closed".into()))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&self.correlation_id);
        }
    }
}
