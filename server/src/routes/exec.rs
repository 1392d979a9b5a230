//! `GET /exec/{trace_id}` and `GET /tool_calls` (spec.md §4.D, §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use echogarden_core::error::ApiError;

use crate::app::AppState;
use crate::error::ApiResult;

pub async fn exec_trace(State(state): State<Arc<AppState>>, Path(trace_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let trace = state
        .storage
        .get_trace(&trace_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("exec_trace {trace_id}")))?;
    let (nodes, edges) = state.storage.trace_nodes_and_edges(&trace_id).await?;
    let tool_calls = state.storage.list_tool_calls(Some(&trace_id), 1000).await?;
    Ok(Json(json!({"trace": trace, "nodes": nodes, "edges": edges, "tool_calls": tool_calls})))
}

#[derive(Deserialize)]
pub struct ToolCallsQuery {
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn tool_calls(State(state): State<Arc<AppState>>, Query(q): Query<ToolCallsQuery>) -> ApiResult<Json<serde_json::Value>> {
    let calls = state
        .storage
        .list_tool_calls(q.trace_id.as_deref(), q.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(Json(json!({"tool_calls": calls})))
}
