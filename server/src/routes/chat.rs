//! `POST /chat`, `GET /conversations`, `GET /conversations/{id}` (spec.md
//! §4.G, §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use echogarden_core::error::ApiError;
use echogarden_core::model::new_id;

use crate::app::AppState;
use crate::error::ApiResult;

fn default_use_graph() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ChatRequest {
    message: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default = "default_use_graph")]
    use_graph: bool,
    #[serde(default)]
    hops: Option<u8>,
    #[serde(default)]
    conversation_id: Option<String>,
}

pub async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> ApiResult<Json<serde_json::Value>> {
    let conversation_id = req.conversation_id.unwrap_or_else(new_id);
    let response = state.qa.chat(&conversation_id, &req.message, req.top_k, req.use_graph, req.hops).await?;
    Ok(Json(json!({
        "conversation_id": conversation_id,
        "turn_id": response.turn_id,
        "trace_id": response.trace_id,
        "answer": response.answer,
        "verdict": response.verdict,
        "citations": response.cited_memory_ids,
        "evidence": response.evidence,
    })))
}

#[derive(Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListConversationsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let conversations = state.storage.list_conversations(q.limit.unwrap_or(50).clamp(1, 500)).await?;
    let conversations: Vec<_> = conversations
        .into_iter()
        .map(|(conversation_id, created_at)| json!({"conversation_id": conversation_id, "created_at": created_at}))
        .collect();
    Ok(Json(json!({"conversations": conversations})))
}

pub async fn get_conversation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    if !state.storage.conversation_exists(&id).await? {
        return Err(ApiError::NotFound(format!("conversation {id}")).into());
    }
    let turns = state.storage.list_turns(&id).await?;
    Ok(Json(json!({"conversation_id": id, "turns": turns})))
}
