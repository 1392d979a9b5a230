//! `POST /ingest` — direct text ingestion (spec.md §6), bypassing the
//! filesystem watcher for text the caller already has in hand.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct IngestRequest {
    text: String,
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn ingest_text(State(state): State<Arc<AppState>>, Json(req): Json<IngestRequest>) -> ApiResult<Json<Value>> {
    if req.text.trim().is_empty() {
        return Err(echogarden_core::error::ApiError::InvalidInput("text must not be empty".into()).into());
    }
    let card_type = req.card_type.unwrap_or_else(|| "note".to_string());
    let metadata = req.metadata.unwrap_or_else(|| json!({}));
    let (memory_id, trace_id) = state.orchestrator.ingest_text(&req.text, &card_type, metadata).await?;
    Ok(Json(json!({"memory_id": memory_id, "trace_id": trace_id})))
}
