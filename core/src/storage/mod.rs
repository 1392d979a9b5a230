//! Relational storage layer (spec.md §4.A). A single `rusqlite::Connection` behind a
//! `tokio::sync::Mutex`, with every blocking call wrapped in `spawn_blocking` — the same
//! shape as the origin crate's `memory/sqlite_store.rs`. Schema creation is idempotent
//! (`CREATE TABLE IF NOT EXISTS`) and versioned via a `schema_version` row.
//!
//! Repositories (cards, blobs, graph, exec, jobs, conversations) are implemented as
//! inherent `impl Storage` blocks split across sibling modules.

mod cards;
mod conversations;
mod exec;
mod graph_repo;
mod jobs;

pub use cards::CardFilter;
pub use graph_repo::{NeighborDirection, NeighborsFilter};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::StorageError;

const SCHEMA_VERSION: i64 = 1;

/// Shared handle to the SQLite-backed store. Cheap to clone (`Arc` inside).
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl Storage {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || -> Result<Connection, StorageError> {
                let conn = Connection::open(&path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                Ok(conn)
            })
            .await
            .map_err(|e| StorageError::Join(e.to_string()))??
        };
        let storage = Storage {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        storage.migrate().await?;
        Ok(storage)
    }

    /// In-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Storage {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA_SQL)?;
            let current: i64 = tx
                .query_row("SELECT version FROM schema_meta WHERE id = 1", [], |r| r.get(0))
                .unwrap_or(0);
            if current < SCHEMA_VERSION {
                tx.execute(
                    "INSERT INTO schema_meta (id, version) VALUES (1, ?1)
                     ON CONFLICT(id) DO UPDATE SET version = excluded.version",
                    rusqlite::params![SCHEMA_VERSION],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Runs a blocking closure against the connection on a `spawn_blocking` thread.
    /// Every repository method funnels through this, matching `sqlite_store.rs`'s
    /// per-call `spawn_blocking` discipline.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS source (
    source_id TEXT PRIMARY KEY,
    source_type TEXT NOT NULL,
    uri TEXT NOT NULL UNIQUE,
    created_ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS blob (
    blob_id TEXT PRIMARY KEY,
    sha256 TEXT NOT NULL,
    path TEXT NOT NULL,
    mime TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    source_id TEXT NOT NULL REFERENCES source(source_id),
    created_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blob_sha256 ON blob(sha256);

CREATE TABLE IF NOT EXISTS file_state (
    path TEXT PRIMARY KEY,
    mtime_ns INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    last_seen_ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job (
    job_id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_run_ts INTEGER NOT NULL,
    payload TEXT NOT NULL,
    error_text TEXT,
    trace_id TEXT,
    created_ts INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_job_status_type ON job(type, status, next_run_ts);

CREATE TABLE IF NOT EXISTS memory_card (
    memory_id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    source_time INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    summary TEXT NOT NULL,
    content_text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    blob_id TEXT,
    trace_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_card_blob_trace ON memory_card(blob_id, trace_id);
CREATE INDEX IF NOT EXISTS idx_card_created_at ON memory_card(created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_card_fts USING fts5(
    summary, content_text, content='memory_card', content_rowid='rowid'
);
CREATE TRIGGER IF NOT EXISTS memory_card_ai AFTER INSERT ON memory_card BEGIN
    INSERT INTO memory_card_fts(rowid, summary, content_text)
    VALUES (new.rowid, new.summary, new.content_text);
END;
CREATE TRIGGER IF NOT EXISTS memory_card_ad AFTER DELETE ON memory_card BEGIN
    INSERT INTO memory_card_fts(memory_card_fts, rowid, summary, content_text)
    VALUES ('delete', old.rowid, old.summary, old.content_text);
END;
CREATE TRIGGER IF NOT EXISTS memory_card_au AFTER UPDATE ON memory_card BEGIN
    INSERT INTO memory_card_fts(memory_card_fts, rowid, summary, content_text)
    VALUES ('delete', old.rowid, old.summary, old.content_text);
    INSERT INTO memory_card_fts(rowid, summary, content_text)
    VALUES (new.rowid, new.summary, new.content_text);
END;

CREATE TABLE IF NOT EXISTS embedding (
    embedding_id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memory_card(memory_id),
    modality TEXT NOT NULL,
    vector_ref TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embedding_memory ON embedding(memory_id);

CREATE TABLE IF NOT EXISTS graph_node (
    node_id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    props TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS graph_edge (
    edge_id TEXT PRIMARY KEY,
    from_node TEXT NOT NULL REFERENCES graph_node(node_id),
    to_node TEXT NOT NULL REFERENCES graph_node(node_id),
    edge_type TEXT NOT NULL,
    weight REAL NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    provenance TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edge_from ON graph_edge(from_node);
CREATE INDEX IF NOT EXISTS idx_edge_to ON graph_edge(to_node);

CREATE TABLE IF NOT EXISTS exec_trace (
    trace_id TEXT PRIMARY KEY,
    started_ts INTEGER NOT NULL,
    finished_ts INTEGER,
    status TEXT NOT NULL,
    root_call_id TEXT,
    metadata TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exec_node (
    exec_node_id TEXT PRIMARY KEY,
    trace_id TEXT NOT NULL REFERENCES exec_trace(trace_id),
    call_id TEXT,
    name TEXT NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 1,
    timeout_ms INTEGER NOT NULL,
    started_ts INTEGER,
    finished_ts INTEGER
);
CREATE INDEX IF NOT EXISTS idx_exec_node_trace ON exec_node(trace_id);

CREATE TABLE IF NOT EXISTS exec_edge (
    from_exec_node TEXT NOT NULL REFERENCES exec_node(exec_node_id),
    to_exec_node TEXT NOT NULL REFERENCES exec_node(exec_node_id),
    condition TEXT NOT NULL,
    PRIMARY KEY (from_exec_node, to_exec_node)
);

CREATE TABLE IF NOT EXISTS tool_call (
    call_id TEXT PRIMARY KEY,
    tool_name TEXT NOT NULL,
    ts INTEGER NOT NULL,
    inputs TEXT NOT NULL,
    outputs TEXT NOT NULL,
    status TEXT NOT NULL,
    trace_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_tool_call_trace ON tool_call(trace_id);

CREATE TABLE IF NOT EXISTS conversation (
    conversation_id TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS turn (
    turn_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversation(conversation_id),
    user_text TEXT NOT NULL,
    assistant_text TEXT NOT NULL,
    verdict TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    citations_json TEXT NOT NULL,
    evidence_json TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_turn_conversation ON turn(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS chat_citation (
    citation_id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL REFERENCES turn(turn_id),
    memory_id TEXT NOT NULL,
    quote TEXT NOT NULL,
    span_start INTEGER NOT NULL,
    span_end INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS search_query (
    search_id TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    filters TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    trace_id TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_search_query_created ON search_query(created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations_idempotently() {
        let storage = Storage::open_in_memory().await.unwrap();
        // Re-running migrate must not error (CREATE TABLE IF NOT EXISTS).
        storage.migrate().await.unwrap();
    }
}
