pub mod file;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use strata_core::config::{BackendKind, GraphConfig};
use strata_core::error::Result;
use strata_core::traits::GraphBackend;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Build the backend selected by `[graph]` configuration.
pub fn open_backend(config: &GraphConfig) -> Result<Arc<dyn GraphBackend>> {
    let backend: Arc<dyn GraphBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(FileBackend::new(config.resolved_path())),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.resolved_path())?),
    };
    info!(backend = backend.name(), "Graph backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_backend_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GraphConfig::default();
        assert_eq!(open_backend(&config).unwrap().name(), "memory");

        config.backend = BackendKind::File;
        config.path = dir.path().join("graph.json").display().to_string();
        assert_eq!(open_backend(&config).unwrap().name(), "file");

        config.backend = BackendKind::Sqlite;
        config.path = dir.path().join("graph.db").display().to_string();
        assert_eq!(open_backend(&config).unwrap().name(), "sqlite");
    }
}
