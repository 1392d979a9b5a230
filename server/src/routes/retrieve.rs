//! `POST /retrieve` and `GET /search/history` (spec.md §4.F, §6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use echogarden_core::model::{new_id, now_ts, ExecTrace, SearchQuery, TraceStatus};
use echogarden_core::retriever::RetrieveFilters;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct RetrieveRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    time_min: Option<i64>,
    #[serde(default)]
    time_max: Option<i64>,
}

pub async fn retrieve(State(state): State<Arc<AppState>>, Json(req): Json<RetrieveRequest>) -> ApiResult<Json<serde_json::Value>> {
    let trace_id = new_id();
    state
        .storage
        .insert_trace(ExecTrace {
            trace_id: trace_id.clone(),
            started_ts: now_ts(),
            finished_ts: None,
            status: TraceStatus::Running,
            root_call_id: None,
            metadata: json!({"query": req.query}),
        })
        .await?;

    let filters = RetrieveFilters {
        source_type: req.source_type,
        card_type: req.card_type,
        time_min: req.time_min,
        time_max: req.time_max,
        ..RetrieveFilters::default()
    };
    let top_k = req.top_k.unwrap_or(8);
    let result = state.retriever.retrieve(&req.query, top_k, &filters, Some(&trace_id)).await;

    let status = if result.is_ok() { TraceStatus::Ok } else { TraceStatus::Error };
    state.storage.finish_trace(&trace_id, status, now_ts()).await?;
    let hits = result?;

    state
        .storage
        .log_search_query(SearchQuery {
            search_id: new_id(),
            query_text: req.query,
            filters: json!(filters_json(&filters)),
            result_count: hits.len() as i64,
            trace_id: Some(trace_id.clone()),
            created_at: now_ts(),
        })
        .await?;

    Ok(Json(json!({"results": hits.iter().map(hit_json).collect::<Vec<_>>(), "trace_id": trace_id})))
}

fn hit_json(hit: &echogarden_core::retriever::RetrievalHit) -> serde_json::Value {
    json!({
        "memory_id": hit.memory_id,
        "summary": hit.summary,
        "final_score": hit.final_score,
        "reasons": hit.reasons,
    })
}

fn filters_json(f: &RetrieveFilters) -> serde_json::Value {
    json!({
        "source_type": f.source_type,
        "card_type": f.card_type,
        "time_min": f.time_min,
        "time_max": f.time_max,
    })
}

#[derive(Deserialize)]
pub struct SearchHistoryQuery {
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn search_history(State(state): State<Arc<AppState>>, Query(q): Query<SearchHistoryQuery>) -> ApiResult<Json<serde_json::Value>> {
    let history = state.storage.list_search_history(q.limit.unwrap_or(50).clamp(1, 500)).await?;
    Ok(Json(json!({"history": history})))
}
