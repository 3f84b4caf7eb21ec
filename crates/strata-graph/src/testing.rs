use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use strata_core::error::Result;
use strata_core::traits::GraphBackend;
use strata_core::types::GraphSnapshot;

/// Minimal in-crate backend so graph tests stay independent of strata-store.
#[derive(Default)]
pub(crate) struct VecBackend {
    saved: Mutex<Option<GraphSnapshot>>,
    saves: AtomicUsize,
}

impl VecBackend {
    pub(crate) fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl GraphBackend for VecBackend {
    fn name(&self) -> &str {
        "test"
    }

    fn load(&self) -> BoxFuture<'_, Result<GraphSnapshot>> {
        Box::pin(async move { Ok(self.saved.lock().unwrap().clone().unwrap_or_default()) })
    }

    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            *self.saved.lock().unwrap() = Some(snapshot);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
