//! `GET /healthz` — component liveness booleans (spec.md §7 "user-visible
//! failure" exposes this for debugging).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use echogarden_core::storage::CardFilter;
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = state.storage.list_cards(CardFilter::default(), 1, 0).await.is_ok();
    Json(json!({
        "db": db_ok,
        "vector_index": true,
        "llm": state.llm_configured,
    }))
}
