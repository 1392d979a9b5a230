//! Conversation/turn/citation repository for the Q&A surface (spec.md §4.G, §6).

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{ChatCitation, Turn, Verdict};

use super::Storage;

fn verdict_str(v: Verdict) -> &'static str {
    match v {
        Verdict::Pass => "pass",
        Verdict::Revise => "revise",
        Verdict::Abstain => "abstain",
    }
}

fn verdict_from_str(s: &str) -> Verdict {
    match s {
        "revise" => Verdict::Revise,
        "abstain" => Verdict::Abstain,
        _ => Verdict::Pass,
    }
}

impl Storage {
    pub async fn create_conversation(&self, conversation_id: &str, created_at: i64) -> Result<(), StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation (conversation_id, created_at) VALUES (?1, ?2)
                 ON CONFLICT(conversation_id) DO NOTHING",
                params![conversation_id, created_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn conversation_exists(&self, conversation_id: &str) -> Result<bool, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation WHERE conversation_id = ?1",
                    params![conversation_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    /// All known conversation ids, newest first, for `GET /conversations`.
    pub async fn list_conversations(&self, limit: i64) -> Result<Vec<(String, i64)>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, created_at FROM conversation ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn insert_turn(&self, turn: Turn) -> Result<Turn, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO turn
                    (turn_id, conversation_id, user_text, assistant_text, verdict, trace_id, citations_json, evidence_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    turn.turn_id,
                    turn.conversation_id,
                    turn.user_text,
                    turn.assistant_text,
                    verdict_str(turn.verdict),
                    turn.trace_id,
                    serde_json::to_string(&turn.citations_json)?,
                    serde_json::to_string(&turn.evidence_json)?,
                    turn.created_at
                ],
            )?;
            Ok(turn)
        })
        .await
    }

    pub async fn list_turns(&self, conversation_id: &str) -> Result<Vec<Turn>, StorageError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, conversation_id, user_text, assistant_text, verdict, trace_id, citations_json, evidence_json, created_at
                 FROM turn WHERE conversation_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![conversation_id], row_to_turn)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn insert_citation(&self, citation: ChatCitation) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_citation (citation_id, turn_id, memory_id, quote, span_start, span_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    citation.citation_id,
                    citation.turn_id,
                    citation.memory_id,
                    citation.quote,
                    citation.span_start,
                    citation.span_end
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn citations_for_turn(&self, turn_id: &str) -> Result<Vec<ChatCitation>, StorageError> {
        let turn_id = turn_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT citation_id, turn_id, memory_id, quote, span_start, span_end
                 FROM chat_citation WHERE turn_id = ?1",
            )?;
            let rows = stmt.query_map(params![turn_id], |r| {
                Ok(ChatCitation {
                    citation_id: r.get(0)?,
                    turn_id: r.get(1)?,
                    memory_id: r.get(2)?,
                    quote: r.get(3)?,
                    span_start: r.get(4)?,
                    span_end: r.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn row_to_turn(r: &rusqlite::Row) -> rusqlite::Result<Turn> {
    let citations: String = r.get(6)?;
    let evidence: String = r.get(7)?;
    Ok(Turn {
        turn_id: r.get(0)?,
        conversation_id: r.get(1)?,
        user_text: r.get(2)?,
        assistant_text: r.get(3)?,
        verdict: verdict_from_str(&r.get::<_, String>(4)?),
        trace_id: r.get(5)?,
        citations_json: serde_json::from_str(&citations).unwrap_or(Value::Null),
        evidence_json: serde_json::from_str(&evidence).unwrap_or(Value::Null),
        created_at: r.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_turn_then_list_preserves_order() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.create_conversation("c1", 1).await.unwrap();
        storage
            .insert_turn(Turn {
                turn_id: "t1".into(),
                conversation_id: "c1".into(),
                user_text: "hi".into(),
                assistant_text: "hello".into(),
                verdict: Verdict::Pass,
                trace_id: "tr1".into(),
                citations_json: json!([]),
                evidence_json: json!([]),
                created_at: 1,
            })
            .await
            .unwrap();
        let turns = storage.list_turns("c1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].assistant_text, "hello");
    }
}
