use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use strata_core::error::{Result, StrataError};
use strata_core::traits::GraphBackend;
use strata_core::types::GraphSnapshot;

/// Stores the snapshot as one JSON document.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-save leaves the previous snapshot intact.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "graph".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl GraphBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self) -> BoxFuture<'_, Result<GraphSnapshot>> {
        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "No snapshot file, starting empty");
                    return Ok(GraphSnapshot::default());
                }
                Err(e) => return Err(e.into()),
            };
            if content.trim().is_empty() {
                return Ok(GraphSnapshot::default());
            }
            serde_json::from_str(&content).map_err(|e| {
                StrataError::Backend(format!("corrupt snapshot {}: {}", self.path.display(), e))
            })
        })
    }

    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let encoded = serde_json::to_string_pretty(snapshot);
        Box::pin(async move {
            let encoded = encoded?;
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StrataError::Backend(format!("Failed to create snapshot directory: {}", e))
                })?;
            }
            let tmp = self.temp_path();
            tokio::fs::write(&tmp, encoded).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            debug!(path = %self.path.display(), "Snapshot written");
            Ok(())
        })
    }
}
