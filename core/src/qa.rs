//! Q&A orchestrator (spec.md §4.G). Handles one chat turn: security filter,
//! retrieve, weave, verify, persist. Dispatches `weaver`/`verifier` through
//! the same [`crate::tools::ToolRegistryLocked`] the ingestion orchestrator
//! uses, so every chat step is recorded as a `tool_call` row exactly like an
//! ingestion step.

use serde_json::{json, Value};

use crate::error::QaError;
use crate::model::{new_id, now_ts, ChatCitation, ExecTrace, Turn, TraceStatus, Verdict};
use crate::retriever::{RetrieveFilters, Retriever};
use crate::storage::Storage;
use crate::tools::ToolRegistryLocked;

const MAX_MESSAGE_LEN: usize = 8_000;
const NON_PRINTABLE_RATIO_THRESHOLD: f64 = 0.3;
const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub turn_id: String,
    pub trace_id: String,
    pub answer: String,
    pub verdict: Verdict,
    pub cited_memory_ids: Vec<String>,
    pub evidence: Vec<Value>,
}

pub struct QaOrchestrator {
    storage: Storage,
    registry: ToolRegistryLocked,
    retriever: std::sync::Arc<Retriever>,
}

impl QaOrchestrator {
    pub fn new(storage: Storage, registry: ToolRegistryLocked, retriever: std::sync::Arc<Retriever>) -> Self {
        Self { storage, registry, retriever }
    }

    pub async fn chat(
        &self,
        conversation_id: &str,
        message: &str,
        top_k: Option<usize>,
        use_graph: bool,
        hops: Option<u8>,
    ) -> Result<ChatResponse, QaError> {
        security_filter(message)?;

        if !self.storage.conversation_exists(conversation_id).await? {
            self.storage.create_conversation(conversation_id, now_ts()).await?;
        }

        let trace_id = new_id();
        self.storage
            .insert_trace(ExecTrace {
                trace_id: trace_id.clone(),
                started_ts: now_ts(),
                finished_ts: None,
                status: TraceStatus::Running,
                root_call_id: None,
                metadata: json!({"conversation_id": conversation_id}),
            })
            .await?;

        let result =
            self.run_turn(conversation_id, message, top_k.unwrap_or(DEFAULT_TOP_K), use_graph, hops, &trace_id).await;

        let status = if result.is_ok() { TraceStatus::Ok } else { TraceStatus::Error };
        self.storage.finish_trace(&trace_id, status, now_ts()).await?;
        result
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        message: &str,
        top_k: usize,
        use_graph: bool,
        hops: Option<u8>,
        trace_id: &str,
    ) -> Result<ChatResponse, QaError> {
        let filters = RetrieveFilters { use_graph, hops, ..RetrieveFilters::default() };
        let hits = self.retriever.retrieve(message, top_k, &filters, Some(trace_id)).await?;

        let evidence: Vec<_> = hits
            .iter()
            .map(|h| json!({"memory_id": h.memory_id, "summary": h.summary, "snippet": h.summary.chars().take(200).collect::<String>(), "score": h.final_score}))
            .collect();

        let weave_out = self
            .registry
            .dispatch("weaver", json!({"query": message, "evidence": evidence}), Some(trace_id))
            .await?;
        let draft_answer = weave_out.get("answer").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        let verify_out = self
            .registry
            .dispatch("verifier", json!({"query": message, "answer": draft_answer, "evidence": evidence}), Some(trace_id))
            .await?;
        let verdict_str = verify_out.get("verdict").and_then(|v| v.as_str()).unwrap_or("pass");
        let verdict = match verdict_str {
            "revise" => Verdict::Revise,
            "abstain" => Verdict::Abstain,
            _ => Verdict::Pass,
        };

        let (final_answer, cited_memory_ids) = match verdict {
            Verdict::Pass => {
                let cited = weave_out
                    .get("cited_memory_ids")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                (draft_answer, cited)
            }
            Verdict::Revise => {
                let revised = verify_out.get("revised_answer").and_then(|v| v.as_str()).unwrap_or(&draft_answer).to_string();
                let cited = hits.iter().map(|h| h.memory_id.clone()).filter(|id| revised.contains(&format!("[{id}]"))).collect();
                (revised, cited)
            }
            Verdict::Abstain => {
                let refusal = verify_out
                    .get("revised_answer")
                    .and_then(|v| v.as_str())
                    .unwrap_or("I don't have enough ingested information to answer that.")
                    .to_string();
                (refusal, Vec::new())
            }
        };

        let turn_id = new_id();
        let created_at = now_ts();
        self.storage
            .insert_turn(Turn {
                turn_id: turn_id.clone(),
                conversation_id: conversation_id.to_string(),
                user_text: message.to_string(),
                assistant_text: final_answer.clone(),
                verdict,
                trace_id: trace_id.to_string(),
                citations_json: json!(cited_memory_ids),
                evidence_json: json!(evidence),
                created_at,
            })
            .await?;

        for memory_id in &cited_memory_ids {
            let quote = hits.iter().find(|h| &h.memory_id == memory_id).map(|h| h.summary.clone()).unwrap_or_default();
            self.storage
                .insert_citation(ChatCitation {
                    citation_id: new_id(),
                    turn_id: turn_id.clone(),
                    memory_id: memory_id.clone(),
                    quote,
                    span_start: 0,
                    span_end: 0,
                })
                .await?;
        }

        Ok(ChatResponse { turn_id, trace_id: trace_id.to_string(), answer: final_answer, verdict, cited_memory_ids, evidence })
    }
}

/// Rejects messages over [`MAX_MESSAGE_LEN`] or with a non-printable byte
/// ratio above [`NON_PRINTABLE_RATIO_THRESHOLD`] (a signal of probable binary
/// paste), per spec.md §4.G step 1.
fn security_filter(message: &str) -> Result<(), QaError> {
    if message.is_empty() {
        return Err(QaError::InvalidInput("message must not be empty".to_string()));
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(QaError::InvalidInput(format!("message exceeds {MAX_MESSAGE_LEN} bytes")));
    }
    let non_printable = message.bytes().filter(|b| *b < 0x09 || (*b > 0x0d && *b < 0x20)).count();
    let ratio = non_printable as f64 / message.len() as f64;
    if ratio > NON_PRINTABLE_RATIO_THRESHOLD {
        return Err(QaError::InvalidInput("message looks like binary content".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::FusionWeights;
    use crate::tools::{ToolConfig, ToolRegistryLocked};
    use crate::vector_index::VectorIndex;
    use std::sync::Arc;

    async fn setup() -> (Storage, QaOrchestrator) {
        let storage = Storage::open_in_memory().await.unwrap();
        let vector_index = Arc::new(VectorIndex::new());
        let registry = crate::tools::build_default_registry(storage.clone(), ToolConfig::default(), vector_index.clone());
        let locked = ToolRegistryLocked::new(registry);
        let retriever = Arc::new(Retriever::new(storage.clone(), vector_index, locked.clone(), FusionWeights::default()));
        crate::tools::register_retrieval_tool(&locked, retriever.clone()).await;
        (storage.clone(), QaOrchestrator::new(storage, locked, retriever))
    }

    #[tokio::test]
    async fn chat_abstains_with_no_ingested_evidence() {
        let (_, qa) = setup().await;
        let resp = qa.chat("c1", "what did I save about rust?", None, true, None).await.unwrap();
        assert_eq!(resp.verdict, Verdict::Abstain);
        assert!(resp.cited_memory_ids.is_empty());
    }

    #[tokio::test]
    async fn chat_passes_and_cites_when_evidence_exists() {
        let (storage, qa) = setup().await;
        storage
            .upsert_card(
                crate::model::MemoryCard {
                    memory_id: "m1".into(),
                    card_type: "note".into(),
                    source_time: now_ts(),
                    created_at: now_ts(),
                    summary: "EchoGarden tracks notes about rust".into(),
                    content_text: "EchoGarden tracks notes about rust programming.".into(),
                    metadata: json!({"pipeline": "text"}),
                },
                None,
                None,
            )
            .await
            .unwrap();

        let resp = qa.chat("c1", "rust notes", None, true, None).await.unwrap();
        assert_eq!(resp.verdict, Verdict::Pass);
        assert_eq!(resp.cited_memory_ids, vec!["m1".to_string()]);
        assert!(resp.answer.contains("[m1]"));
        assert!(!resp.evidence.is_empty());
    }

    #[tokio::test]
    async fn security_filter_rejects_oversized_message() {
        let long = "a".repeat(MAX_MESSAGE_LEN + 1);
        assert!(security_filter(&long).is_err());
    }

    #[tokio::test]
    async fn security_filter_rejects_binary_paste() {
        let binary: String = (0u8..=31).map(|b| b as char).collect();
        assert!(security_filter(&binary).is_err());
    }
}
