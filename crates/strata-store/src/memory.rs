use std::sync::Mutex;

use futures::future::BoxFuture;

use strata_core::error::{Result, StrataError};
use strata_core::traits::GraphBackend;
use strata_core::types::GraphSnapshot;

/// Process-local backend. Snapshots survive `save`/`load` but not a restart.
#[derive(Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<GraphSnapshot>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> BoxFuture<'_, Result<GraphSnapshot>> {
        Box::pin(async move {
            let stored = self
                .snapshot
                .lock()
                .map_err(|e| StrataError::Backend(e.to_string()))?;
            Ok(stored.clone().unwrap_or_default())
        })
    }

    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let mut stored = self
                .snapshot
                .lock()
                .map_err(|e| StrataError::Backend(e.to_string()))?;
            *stored = Some(snapshot);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::types::{Edge, Node};

    #[tokio::test]
    async fn test_empty_load() {
        let backend = MemoryBackend::new();
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let backend = MemoryBackend::new();
        let mut snapshot = GraphSnapshot::default();
        snapshot.nodes.insert("a".into(), Node::new("a", "thing"));
        snapshot.edges.insert("a".into(), vec![Edge::new("a", "self")]);
        backend.save(&snapshot).await.unwrap();

        backend.save(&GraphSnapshot::default()).await.unwrap();
        assert!(backend.load().await.unwrap().is_empty());
    }
}
