//! Source, Blob, FileState, MemoryCard, Embedding, and search-history repositories.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{
    Blob, Embedding, FileState, MemoryCard, Modality, SearchQuery, Source, SourceType,
};

use super::Storage;

fn source_type_str(t: SourceType) -> &'static str {
    match t {
        SourceType::Filesystem => "filesystem",
        SourceType::Api => "api",
        SourceType::Browser => "browser",
    }
}

fn source_type_from_str(s: &str) -> SourceType {
    match s {
        "api" => SourceType::Api,
        "browser" => SourceType::Browser,
        _ => SourceType::Filesystem,
    }
}

fn modality_str(m: Modality) -> &'static str {
    match m {
        Modality::Text => "text",
        Modality::Vision => "vision",
    }
}

/// Filter for `cards.list` / `cards.search` (spec.md §4.A).
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    pub source_type: Option<String>,
    pub card_type: Option<String>,
}

impl Storage {
    pub async fn insert_source(&self, source: Source) -> Result<Source, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO source (source_id, source_type, uri, created_ts)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uri) DO NOTHING",
                params![
                    source.source_id,
                    source_type_str(source.source_type),
                    source.uri,
                    source.created_ts
                ],
            )?;
            let row = conn.query_row(
                "SELECT source_id, source_type, uri, created_ts FROM source WHERE uri = ?1",
                params![source.uri],
                |r| {
                    Ok(Source {
                        source_id: r.get(0)?,
                        source_type: source_type_from_str(&r.get::<_, String>(1)?),
                        uri: r.get(2)?,
                        created_ts: r.get(3)?,
                    })
                },
            )?;
            Ok(row)
        })
        .await
    }

    pub async fn find_source_by_uri(&self, uri: &str) -> Result<Option<Source>, StorageError> {
        let uri = uri.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_id, source_type, uri, created_ts FROM source WHERE uri = ?1",
                    params![uri],
                    |r| {
                        Ok(Source {
                            source_id: r.get(0)?,
                            source_type: source_type_from_str(&r.get::<_, String>(1)?),
                            uri: r.get(2)?,
                            created_ts: r.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn insert_blob(&self, blob: Blob) -> Result<Blob, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO blob (blob_id, sha256, path, mime, size_bytes, source_id, created_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    blob.blob_id,
                    blob.sha256,
                    blob.path,
                    blob.mime,
                    blob.size_bytes,
                    blob.source_id,
                    blob.created_ts
                ],
            )?;
            Ok(blob)
        })
        .await
    }

    pub async fn find_blob(&self, blob_id: &str) -> Result<Option<Blob>, StorageError> {
        let blob_id = blob_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT blob_id, sha256, path, mime, size_bytes, source_id, created_ts
                     FROM blob WHERE blob_id = ?1",
                    params![blob_id],
                    row_to_blob,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Finds blobs sharing a sha256, per spec.md's "multiple blobs may share a sha" invariant.
    pub async fn find_blobs_by_sha(&self, sha256: &str) -> Result<Vec<Blob>, StorageError> {
        let sha256 = sha256.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT blob_id, sha256, path, mime, size_bytes, source_id, created_ts
                 FROM blob WHERE sha256 = ?1",
            )?;
            let rows = stmt.query_map(params![sha256], row_to_blob)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn get_file_state(&self, path: &str) -> Result<Option<FileState>, StorageError> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT path, mtime_ns, size_bytes, sha256, last_seen_ts
                     FROM file_state WHERE path = ?1",
                    params![path],
                    |r| {
                        Ok(FileState {
                            path: r.get(0)?,
                            mtime_ns: r.get(1)?,
                            size_bytes: r.get(2)?,
                            sha256: r.get(3)?,
                            last_seen_ts: r.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn upsert_file_state(&self, state: FileState) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO file_state (path, mtime_ns, size_bytes, sha256, last_seen_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET
                    mtime_ns = excluded.mtime_ns,
                    size_bytes = excluded.size_bytes,
                    sha256 = excluded.sha256,
                    last_seen_ts = excluded.last_seen_ts",
                params![
                    state.path,
                    state.mtime_ns,
                    state.size_bytes,
                    state.sha256,
                    state.last_seen_ts
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Idempotent insert: a card with the same `(blob_id, trace_id)` returns the
    /// existing `memory_id` instead of inserting a duplicate (spec.md §4.A, §4.D).
    pub async fn upsert_card(
        &self,
        card: MemoryCard,
        blob_id: Option<String>,
        trace_id: Option<String>,
    ) -> Result<MemoryCard, StorageError> {
        self.with_conn(move |conn| {
            if let (Some(b), Some(t)) = (&blob_id, &trace_id) {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT memory_id FROM memory_card WHERE blob_id = ?1 AND trace_id = ?2",
                        params![b, t],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(memory_id) = existing {
                    return row_get_card(conn, &memory_id);
                }
            }
            conn.execute(
                "INSERT INTO memory_card
                    (memory_id, type, source_time, created_at, summary, content_text, metadata, blob_id, trace_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    card.memory_id,
                    card.card_type,
                    card.source_time,
                    card.created_at,
                    card.summary,
                    card.content_text,
                    serde_json::to_string(&card.metadata)?,
                    blob_id,
                    trace_id
                ],
            )?;
            Ok(card)
        })
        .await
    }

    pub async fn get_card(&self, memory_id: &str) -> Result<Option<MemoryCard>, StorageError> {
        let memory_id = memory_id.to_string();
        self.with_conn(move |conn| {
            match row_get_card(conn, &memory_id) {
                Ok(c) => Ok(Some(c)),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn find_card_by_blob_and_trace(
        &self,
        blob_id: &str,
        trace_id: &str,
    ) -> Result<Option<MemoryCard>, StorageError> {
        let (blob_id, trace_id) = (blob_id.to_string(), trace_id.to_string());
        self.with_conn(move |conn| {
            let memory_id: Option<String> = conn
                .query_row(
                    "SELECT memory_id FROM memory_card WHERE blob_id = ?1 AND trace_id = ?2",
                    params![blob_id, trace_id],
                    |r| r.get(0),
                )
                .optional()?;
            match memory_id {
                Some(id) => Ok(Some(row_get_card(conn, &id)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_cards(
        &self,
        filter: CardFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MemoryCard>, StorageError> {
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT memory_id, type, source_time, created_at, summary, content_text, metadata
                 FROM memory_card WHERE 1=1",
            );
            if filter.card_type.is_some() {
                sql.push_str(" AND type = ?1");
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?2 OFFSET ?3");
            let mut stmt = conn.prepare(&sql)?;
            let rows = if let Some(ct) = &filter.card_type {
                stmt.query_map(params![ct, limit, offset], row_to_card)?
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                // Re-prepare without the unused placeholder to keep bind count correct.
                let mut stmt2 = conn.prepare(
                    "SELECT memory_id, type, source_time, created_at, summary, content_text, metadata
                     FROM memory_card ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )?;
                let result = stmt2
                    .query_map(params![limit, offset], row_to_card)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            };
            let rows = if let Some(st) = &filter.source_type {
                rows.into_iter()
                    .filter(|c| {
                        c.metadata
                            .get("source_type")
                            .and_then(|v| v.as_str())
                            .map(|v| v == st)
                            .unwrap_or(false)
                    })
                    .collect()
            } else {
                rows
            };
            Ok(rows)
        })
        .await
    }

    /// Full-text search over `summary`/`content_text` via the FTS5 virtual table.
    pub async fn search_cards(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(MemoryCard, f64)>, StorageError> {
        let query = query.to_string();
        self.with_conn(move |conn| {
            let fts_query = sanitize_fts_query(&query);
            if fts_query.is_empty() {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT mc.memory_id, mc.type, mc.source_time, mc.created_at, mc.summary,
                        mc.content_text, mc.metadata, bm25(memory_card_fts) AS rank
                 FROM memory_card_fts
                 JOIN memory_card mc ON mc.rowid = memory_card_fts.rowid
                 WHERE memory_card_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![fts_query, limit], |r| {
                let card = row_to_card(r)?;
                let rank: f64 = r.get(7)?;
                Ok((card, rank))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn insert_embedding(&self, embedding: Embedding) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO embedding (embedding_id, memory_id, modality, vector_ref)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    embedding.embedding_id,
                    embedding.memory_id,
                    modality_str(embedding.modality),
                    embedding.vector_ref
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn recent_cards(&self, limit: i64) -> Result<Vec<MemoryCard>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT memory_id, type, source_time, created_at, summary, content_text, metadata
                 FROM memory_card ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_card)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn log_search_query(&self, q: SearchQuery) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO search_query (search_id, query_text, filters, result_count, trace_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    q.search_id,
                    q.query_text,
                    serde_json::to_string(&q.filters)?,
                    q.result_count,
                    q.trace_id,
                    q.created_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_search_history(&self, limit: i64) -> Result<Vec<SearchQuery>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT search_id, query_text, filters, result_count, trace_id, created_at
                 FROM search_query ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |r| {
                let filters: String = r.get(2)?;
                Ok(SearchQuery {
                    search_id: r.get(0)?,
                    query_text: r.get(1)?,
                    filters: serde_json::from_str(&filters).unwrap_or(Value::Null),
                    result_count: r.get(3)?,
                    trace_id: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn row_to_blob(r: &rusqlite::Row) -> rusqlite::Result<Blob> {
    Ok(Blob {
        blob_id: r.get(0)?,
        sha256: r.get(1)?,
        path: r.get(2)?,
        mime: r.get(3)?,
        size_bytes: r.get(4)?,
        source_id: r.get(5)?,
        created_ts: r.get(6)?,
    })
}

fn row_to_card(r: &rusqlite::Row) -> rusqlite::Result<MemoryCard> {
    let metadata: String = r.get(6)?;
    Ok(MemoryCard {
        memory_id: r.get(0)?,
        card_type: r.get(1)?,
        source_time: r.get(2)?,
        created_at: r.get(3)?,
        summary: r.get(4)?,
        content_text: r.get(5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
    })
}

fn row_get_card(conn: &rusqlite::Connection, memory_id: &str) -> Result<MemoryCard, StorageError> {
    conn.query_row(
        "SELECT memory_id, type, source_time, created_at, summary, content_text, metadata
         FROM memory_card WHERE memory_id = ?1",
        params![memory_id],
        row_to_card,
    )
    .optional()?
    .ok_or_else(|| StorageError::NotFound(format!("memory_card {memory_id}")))
}

/// FTS5 MATCH treats most punctuation as syntax; strip it down to alphanumeric terms
/// OR'd together so free-text queries ("knowledge garden") never throw a syntax error.
fn sanitize_fts_query(q: &str) -> String {
    q.split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .map(|w| format!("{w}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_card(id: &str) -> MemoryCard {
        MemoryCard {
            memory_id: id.to_string(),
            card_type: "note".to_string(),
            source_time: 1,
            created_at: 1,
            summary: "EchoGarden summary".to_string(),
            content_text: "EchoGarden is a local-first knowledge garden.".to_string(),
            metadata: json!({"pipeline": "text"}),
        }
    }

    #[tokio::test]
    async fn upsert_card_is_idempotent_by_blob_and_trace() {
        let storage = Storage::open_in_memory().await.unwrap();
        let c1 = storage
            .upsert_card(sample_card("m1"), Some("b1".into()), Some("t1".into()))
            .await
            .unwrap();
        let c2 = storage
            .upsert_card(sample_card("m2"), Some("b1".into()), Some("t1".into()))
            .await
            .unwrap();
        assert_eq!(c1.memory_id, c2.memory_id);
    }

    #[tokio::test]
    async fn search_cards_finds_fts_match() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage
            .upsert_card(sample_card("m1"), None, None)
            .await
            .unwrap();
        let hits = storage.search_cards("knowledge garden", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.memory_id, "m1");
    }

    #[tokio::test]
    async fn find_blobs_by_sha_returns_all_sharing_content() {
        let storage = Storage::open_in_memory().await.unwrap();
        let src = storage
            .insert_source(Source {
                source_id: "s1".into(),
                source_type: SourceType::Filesystem,
                uri: "file:///watch".into(),
                created_ts: 1,
            })
            .await
            .unwrap();
        storage
            .insert_blob(Blob {
                blob_id: "b1".into(),
                sha256: "deadbeef".into(),
                path: "a.txt".into(),
                mime: "text/plain".into(),
                size_bytes: 3,
                source_id: src.source_id.clone(),
                created_ts: 1,
            })
            .await
            .unwrap();
        storage
            .insert_blob(Blob {
                blob_id: "b2".into(),
                sha256: "deadbeef".into(),
                path: "b.txt".into(),
                mime: "text/plain".into(),
                size_bytes: 3,
                source_id: src.source_id,
                created_ts: 1,
            })
            .await
            .unwrap();
        let blobs = storage.find_blobs_by_sha("deadbeef").await.unwrap();
        assert_eq!(blobs.len(), 2);
    }
}
