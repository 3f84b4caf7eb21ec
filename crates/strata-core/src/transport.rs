use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StrataError};
use crate::traits::{subject_matches, EventHandler, Transport};
use crate::types::{Event, SubscriptionId};

struct Subscription {
    id: SubscriptionId,
    subject: String,
    handler: Arc<dyn EventHandler>,
}

/// Synchronous in-process transport.
///
/// `publish` runs every matching handler on the caller's task, in
/// registration order, before it returns. A failing handler is logged and
/// skipped; it never fails the publish or starves later subscribers.
pub struct InProcessTransport {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InProcessTransport {
    fn name(&self) -> &str {
        "in_process"
    }

    fn is_synchronous(&self) -> bool {
        true
    }

    fn publish(&self, subject: &str, event: Event) -> BoxFuture<'_, Result<()>> {
        let subject = subject.to_string();
        Box::pin(async move {
            // Snapshot the matching handlers so they may subscribe or publish re-entrantly.
            let handlers: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = {
                let subs = self
                    .subscriptions
                    .read()
                    .map_err(|e| StrataError::Transport(e.to_string()))?;
                subs.iter()
                    .filter(|s| subject_matches(&s.subject, &subject))
                    .map(|s| (s.id, s.handler.clone()))
                    .collect()
            };

            debug!(subject = %subject, event_id = %event.id, handlers = handlers.len(), "Delivering event");

            for (id, handler) in handlers {
                if let Err(e) = handler.handle(event.clone()).await {
                    warn!(
                        subscription = %id,
                        subject = %subject,
                        event_id = %event.id,
                        error = %e,
                        "Event handler failed"
                    );
                }
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> BoxFuture<'_, Result<SubscriptionId>> {
        let subject = subject.to_string();
        Box::pin(async move {
            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.subscriptions
                .write()
                .map_err(|e| StrataError::Transport(e.to_string()))?
                .push(Subscription {
                    id,
                    subject,
                    handler,
                });
            Ok(id)
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.subscriptions
                .write()
                .map_err(|e| StrataError::Transport(e.to_string()))?
                .retain(|s| s.id != id);
            Ok(())
        })
    }
}

/// Asynchronous transport over a tokio broadcast channel.
///
/// Stands in for a message broker: `publish` returns as soon as the event is
/// queued, and each subscription drains the channel on its own task. Events
/// may be observed after `publish` returns and in no guaranteed order
/// relative to other subscriptions, so consumers should wrap handlers in
/// `DedupHandler` and never assume the synchronous ordering of
/// `InProcessTransport`.
pub struct BroadcastTransport {
    tx: broadcast::Sender<(String, Event)>,
    tasks: Mutex<HashMap<SubscriptionId, CancellationToken>>,
    next_id: AtomicU64,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.lock() {
            for token in tasks.values() {
                token.cancel();
            }
        }
    }
}

impl Transport for BroadcastTransport {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn is_synchronous(&self) -> bool {
        false
    }

    fn publish(&self, subject: &str, event: Event) -> BoxFuture<'_, Result<()>> {
        let subject = subject.to_string();
        Box::pin(async move {
            // Ignore error if no receivers
            let receivers = self.tx.send((subject.clone(), event)).unwrap_or(0);
            debug!(subject = %subject, receivers, "Queued event");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> BoxFuture<'_, Result<SubscriptionId>> {
        let pattern = subject.to_string();
        Box::pin(async move {
            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let token = CancellationToken::new();
            let mut rx = self.tx.subscribe();

            self.tasks
                .lock()
                .map_err(|e| StrataError::Transport(e.to_string()))?
                .insert(id, token.clone());

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Ok((subject, event)) => {
                                if !subject_matches(&pattern, &subject) {
                                    continue;
                                }
                                if let Err(e) = handler.handle(event).await {
                                    warn!(subscription = %id, subject = %subject, error = %e, "Event handler failed");
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(subscription = %id, skipped = n, "Subscriber lagged, events dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                debug!(subscription = %id, "Subscription task finished");
            });

            Ok(id)
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let token = self
                .tasks
                .lock()
                .map_err(|e| StrataError::Transport(e.to_string()))?
                .remove(&id);
            if let Some(token) = token {
                token.cancel();
            }
            Ok(())
        })
    }
}
