use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use strata_core::error::{Result, StrataError};
use strata_core::traits::GraphBackend;
use strata_core::types::{Edge, Fields, GraphSnapshot, Node};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        metadata TEXT NOT NULL,
        spec TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS edges (
        source TEXT NOT NULL,
        target TEXT NOT NULL,
        edge_type TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (source, target, edge_type)
    );

    CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source, position);";

fn db_err(e: impl std::fmt::Display) -> StrataError {
    StrataError::Backend(e.to_string())
}

/// SQLite-backed snapshot store. `save` replaces both tables in one transaction.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StrataError::Backend(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn decode_fields(raw: &str) -> Result<Fields> {
    if raw.is_empty() {
        return Ok(Fields::new());
    }
    Ok(serde_json::from_str(raw)?)
}

impl GraphBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn load(&self) -> BoxFuture<'_, Result<GraphSnapshot>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut snapshot = GraphSnapshot::default();

            let mut stmt = conn
                .prepare("SELECT id, kind, metadata, spec FROM nodes ORDER BY id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(db_err)?;
            for row in rows {
                let (id, kind, metadata, spec) = row.map_err(db_err)?;
                let node = Node {
                    id: id.clone(),
                    kind,
                    metadata: decode_fields(&metadata)?,
                    spec: decode_fields(&spec)?,
                };
                snapshot.nodes.insert(id, node);
            }

            let mut stmt = conn
                .prepare("SELECT source, target, edge_type FROM edges ORDER BY source, position")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(db_err)?;
            for row in rows {
                let (source, target, edge_type) = row.map_err(db_err)?;
                snapshot
                    .edges
                    .entry(source)
                    .or_default()
                    .push(Edge::new(target, edge_type));
            }

            debug!(
                nodes = snapshot.nodes.len(),
                edges = snapshot.edge_count(),
                "SQLite snapshot loaded"
            );
            Ok(snapshot)
        })
    }

    fn save(&self, snapshot: &GraphSnapshot) -> BoxFuture<'_, Result<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute("DELETE FROM edges", []).map_err(db_err)?;
            tx.execute("DELETE FROM nodes", []).map_err(db_err)?;

            {
                let mut insert_node = tx
                    .prepare("INSERT INTO nodes (id, kind, metadata, spec) VALUES (?1, ?2, ?3, ?4)")
                    .map_err(db_err)?;
                for node in snapshot.nodes.values() {
                    let metadata = serde_json::to_string(&node.metadata)?;
                    let spec = serde_json::to_string(&node.spec)?;
                    insert_node
                        .execute(params![node.id, node.kind, metadata, spec])
                        .map_err(db_err)?;
                }

                let mut insert_edge = tx
                    .prepare(
                        "INSERT OR IGNORE INTO edges (source, target, edge_type, position)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(db_err)?;
                for (source, edges) in &snapshot.edges {
                    for (position, edge) in edges.iter().enumerate() {
                        insert_edge
                            .execute(params![source, edge.to, edge.edge_type, position as i64])
                            .map_err(db_err)?;
                    }
                }
            }

            tx.commit().map_err(db_err)?;
            debug!(
                nodes = snapshot.nodes.len(),
                edges = snapshot.edge_count(),
                "SQLite snapshot saved"
            );
            Ok(())
        })
    }
}
